//! Benchmark statistics engine (spec §4.11, C12): per-variant metric
//! aggregation, pairwise Welch's t-test / chi-squared comparison, effect
//! size, and a human-readable summary.

use agentlens_store::{SessionFilter, Store};
use agentlens_types::{Benchmark, BenchmarkVariant, ComparisonKind, Metric, Result, Session, SessionStatus};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MetricStats {
    pub mean: f64,
    pub median: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct VariantResult {
    pub variant: BenchmarkVariant,
    pub session_count: usize,
    pub metrics: Vec<(Metric, MetricStats)>,
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub metric: Metric,
    pub variant_a: String,
    pub variant_b: String,
    pub p_value: f64,
    pub significant: bool,
    pub confidence_stars: &'static str,
    pub effect_size: f64,
    pub winner: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub variants: Vec<VariantResult>,
    pub comparisons: Vec<Comparison>,
    pub summary: String,
}

pub struct BenchmarkEngine {
    store: Arc<dyn Store>,
}

impl BenchmarkEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Runs the benchmark treating every metric as continuous (Welch's
    /// t-test), including proportion metrics like `tool_success_rate`.
    pub async fn run(&self, tenant_id: &str, benchmark: &Benchmark) -> Result<BenchmarkReport> {
        self.run_with_kind(tenant_id, benchmark, ComparisonKind::Continuous).await
    }

    /// Runs the benchmark with an explicit comparison kind. Proportion
    /// metrics opt into the categorical chi-squared path only when the
    /// caller passes `ComparisonKind::Categorical`; non-proportion metrics
    /// always use Welch's t-test regardless of `kind`.
    pub async fn run_with_kind(&self, tenant_id: &str, benchmark: &Benchmark, kind: ComparisonKind) -> Result<BenchmarkReport> {
        let mut variant_sessions = Vec::with_capacity(benchmark.variants.len());
        for variant in &benchmark.variants {
            let filter = SessionFilter { limit: u32::MAX, ..Default::default() };
            let sessions: Vec<Session> = self
                .store
                .query_sessions(tenant_id, &filter)
                .await?
                .into_iter()
                .filter(|s| s.tags.iter().any(|t| t == &variant.tag))
                .collect();
            variant_sessions.push((variant.clone(), sessions));
        }

        let variants: Vec<VariantResult> = variant_sessions
            .iter()
            .map(|(variant, sessions)| VariantResult {
                variant: variant.clone(),
                session_count: sessions.len(),
                metrics: benchmark.metrics.iter().map(|m| (*m, aggregate_metric(*m, sessions))).collect(),
            })
            .collect();

        let mut comparisons = Vec::new();
        for metric in &benchmark.metrics {
            for i in 0..variants.len() {
                for j in (i + 1)..variants.len() {
                    let (_, sessions_a) = &variant_sessions[i];
                    let (_, sessions_b) = &variant_sessions[j];
                    let samples_a = metric_samples(*metric, sessions_a);
                    let samples_b = metric_samples(*metric, sessions_b);
                    if samples_a.is_empty() || samples_b.is_empty() {
                        continue;
                    }
                    comparisons.push(compare(
                        *metric,
                        &variants[i].variant.name,
                        &variants[j].variant.name,
                        &samples_a,
                        &samples_b,
                        kind,
                    ));
                }
            }
        }

        let summary = summarize(&variants, &comparisons);
        Ok(BenchmarkReport { variants, comparisons, summary })
    }
}

/// Extracts this metric's per-session sample values per the spec's
/// extraction rules, skipping sessions the rule says to skip.
fn metric_samples(metric: Metric, sessions: &[Session]) -> Vec<f64> {
    sessions
        .iter()
        .filter_map(|s| match metric {
            Metric::AvgCost => Some(s.aggregates.total_cost_usd),
            Metric::ErrorRate => {
                if s.aggregates.event_count == 0 {
                    None
                } else {
                    Some(s.aggregates.error_count as f64 / s.aggregates.event_count as f64)
                }
            }
            Metric::ToolSuccessRate => {
                if s.aggregates.tool_call_count == 0 {
                    None
                } else {
                    Some((s.aggregates.tool_call_count.saturating_sub(s.aggregates.error_count)) as f64 / s.aggregates.tool_call_count as f64)
                }
            }
            Metric::CompletionRate => Some(if s.status == SessionStatus::Completed { 1.0 } else { 0.0 }),
            Metric::AvgTokens => Some((s.aggregates.total_input_tokens + s.aggregates.total_output_tokens) as f64),
            Metric::AvgDuration => s.ended_at.map(|ended| (ended - s.started_at).num_milliseconds() as f64),
        })
        .collect()
}

fn aggregate_metric(metric: Metric, sessions: &[Session]) -> MetricStats {
    let mut samples = metric_samples(metric, sessions);
    if samples.is_empty() {
        return MetricStats::default();
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let count = samples.len();
    let mean = samples.iter().sum::<f64>() / count as f64;
    let median = if count % 2 == 0 { (samples[count / 2 - 1] + samples[count / 2]) / 2.0 } else { samples[count / 2] };
    let variance = if count > 1 {
        samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64
    } else {
        0.0
    };

    MetricStats {
        mean,
        median,
        stddev: variance.sqrt(),
        min: samples[0],
        max: samples[count - 1],
        count,
    }
}

fn mean_var(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = if samples.len() > 1 {
        samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    (mean, variance)
}

fn confidence_stars(p: f64) -> &'static str {
    if p < 0.01 {
        "★★★"
    } else if p < 0.05 {
        "★★"
    } else if p < 0.1 {
        "★"
    } else {
        "—"
    }
}

fn compare(metric: Metric, name_a: &str, name_b: &str, samples_a: &[f64], samples_b: &[f64], kind: ComparisonKind) -> Comparison {
    let (mean_a, var_a) = mean_var(samples_a);
    let (mean_b, var_b) = mean_var(samples_b);
    let na = samples_a.len() as f64;
    let nb = samples_b.len() as f64;

    let (p_value, effect_size) = if kind == ComparisonKind::Categorical && metric.is_proportion() {
        let (chi2, phi) = chi_squared(samples_a, samples_b);
        (chi_squared_p(chi2), phi)
    } else {
        let (t, df) = welch_t(mean_a, var_a, na, mean_b, var_b, nb);
        let pooled = ((var_a + var_b) / 2.0).sqrt();
        let d = if pooled > 0.0 { (mean_a - mean_b).abs() / pooled } else { 0.0 };
        (welch_p(t, df), d)
    };

    let significant = p_value < 0.1;
    let winner = if significant {
        match metric.lower_is_better() {
            Some(true) if mean_a < mean_b => Some(name_a.to_string()),
            Some(true) => Some(name_b.to_string()),
            Some(false) if mean_a > mean_b => Some(name_a.to_string()),
            Some(false) => Some(name_b.to_string()),
            None => None,
        }
    } else {
        None
    };

    Comparison {
        metric,
        variant_a: name_a.to_string(),
        variant_b: name_b.to_string(),
        p_value,
        significant,
        confidence_stars: confidence_stars(p_value),
        effect_size,
        winner,
    }
}

/// Welch's t-statistic and Welch–Satterthwaite degrees of freedom.
fn welch_t(mean_a: f64, var_a: f64, na: f64, mean_b: f64, var_b: f64, nb: f64) -> (f64, f64) {
    let se2 = var_a / na + var_b / nb;
    if se2 <= 0.0 {
        return (0.0, na + nb - 2.0);
    }
    let t = (mean_a - mean_b) / se2.sqrt();
    let df_num = se2.powi(2);
    let df_den = (var_a / na).powi(2) / (na - 1.0).max(1.0) + (var_b / nb).powi(2) / (nb - 1.0).max(1.0);
    let df = if df_den > 0.0 { df_num / df_den } else { na + nb - 2.0 };
    (t, df)
}

/// Two-sided p-value from Student's t distribution via a numeric integration
/// of its PDF, accurate enough for df in the tens-to-hundreds range this
/// engine sees (session counts rarely exceed a few thousand per variant).
fn welch_p(t: f64, df: f64) -> f64 {
    if df <= 0.0 {
        return 1.0;
    }
    let t = t.abs();
    2.0 * (1.0 - student_t_cdf(t, df))
}

fn student_t_cdf(t: f64, df: f64) -> f64 {
    // CDF(t) = 1 - 0.5*I_x(df/2, 1/2), x = df/(df+t^2), via the regularized
    // incomplete beta function.
    let x = df / (df + t * t);
    let ibeta = incomplete_beta(x, df / 2.0, 0.5);
    1.0 - 0.5 * ibeta
}

/// Regularized incomplete beta function via a continued fraction
/// (Numerical Recipes' `betacf`), sufficient precision for p-value
/// thresholding at the 0.01/0.05/0.1 boundaries this engine reports.
fn incomplete_beta(x: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_beta = ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b);
    let front = (a * x.ln() + b * (1.0 - x).ln() - ln_beta).exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * betacf(x, a, b) / a
    } else {
        1.0 - front * betacf(1.0 - x, b, a) / b
    }
}

fn betacf(x: f64, a: f64, b: f64) -> f64 {
    const MAX_ITER: u32 = 200;
    const EPS: f64 = 1e-10;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < EPS {
        d = EPS;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < EPS {
            d = EPS;
        }
        c = 1.0 + aa / c;
        if c.abs() < EPS {
            c = EPS;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < EPS {
            d = EPS;
        }
        c = 1.0 + aa / c;
        if c.abs() < EPS {
            c = EPS;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5 - (x + 5.5).ln() * (x + 0.5);
    let mut ser = 1.000000000190015;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

/// 2x2 contingency table chi-squared statistic (successes/failures per
/// variant, df=1) and phi effect size.
fn chi_squared(samples_a: &[f64], samples_b: &[f64]) -> (f64, f64) {
    let successes_a = samples_a.iter().filter(|&&v| v > 0.0).count() as f64;
    let failures_a = samples_a.len() as f64 - successes_a;
    let successes_b = samples_b.iter().filter(|&&v| v > 0.0).count() as f64;
    let failures_b = samples_b.len() as f64 - successes_b;

    let n = successes_a + failures_a + successes_b + failures_b;
    if n == 0.0 {
        return (0.0, 0.0);
    }

    let row1 = successes_a + successes_b;
    let row2 = failures_a + failures_b;
    let col1 = successes_a + failures_a;
    let col2 = successes_b + failures_b;

    let expected = |row: f64, col: f64| row * col / n;
    let e = [
        expected(row1, col1),
        expected(row1, col2),
        expected(row2, col1),
        expected(row2, col2),
    ];
    let o = [successes_a, successes_b, failures_a, failures_b];

    let chi2 = o.iter().zip(e.iter()).filter(|(_, &e)| e > 0.0).map(|(&o, &e)| (o - e).powi(2) / e).sum::<f64>();
    let phi = (chi2 / n).sqrt();
    (chi2, phi)
}

/// p-value for chi-squared with df=1 via the chi-squared CDF, itself the
/// regularized incomplete beta in disguise (`P(chi2>x) = 1 - CDF`, and for
/// df=1, `CDF(x) = erf(sqrt(x/2))`, computed through the incomplete beta).
fn chi_squared_p(chi2: f64) -> f64 {
    if chi2 <= 0.0 {
        return 1.0;
    }
    1.0 - incomplete_beta(1.0 / (1.0 + chi2), 0.5, 0.5).min(1.0)
}

fn summarize(variants: &[VariantResult], comparisons: &[Comparison]) -> String {
    let mut parts = Vec::new();

    for v in variants {
        if v.session_count < 30 {
            parts.push(format!("{} has insufficient data ({} sessions)", v.variant.name, v.session_count));
        }
    }

    let significant: Vec<&Comparison> = comparisons.iter().filter(|c| c.significant && c.winner.is_some()).collect();
    if significant.is_empty() {
        parts.push("no significant difference".to_string());
    } else {
        for c in &significant {
            let winner = c.winner.as_deref().unwrap_or("");
            let loser = if winner == c.variant_a { &c.variant_b } else { &c.variant_a };
            parts.push(format!("{} outperforms {} on {:?} ({})", winner, loser, c.metric, c.confidence_stars));
        }
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_stars_follow_thresholds() {
        assert_eq!(confidence_stars(0.005), "★★★");
        assert_eq!(confidence_stars(0.03), "★★");
        assert_eq!(confidence_stars(0.08), "★");
        assert_eq!(confidence_stars(0.5), "—");
    }

    #[test]
    fn welch_t_clearly_different_means_yields_small_p() {
        let a = [1.0, 1.1, 0.9, 1.05, 0.95];
        let b = [5.0, 5.1, 4.9, 5.05, 4.95];
        let (mean_a, var_a) = mean_var(&a);
        let (mean_b, var_b) = mean_var(&b);
        let (t, df) = welch_t(mean_a, var_a, a.len() as f64, mean_b, var_b, b.len() as f64);
        let p = welch_p(t, df);
        assert!(p < 0.01, "expected a small p-value, got {p}");
    }

    #[test]
    fn welch_t_identical_distributions_yields_large_p() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [1.0, 2.0, 3.0, 4.0, 5.0];
        let (mean_a, var_a) = mean_var(&a);
        let (mean_b, var_b) = mean_var(&b);
        let (t, df) = welch_t(mean_a, var_a, a.len() as f64, mean_b, var_b, b.len() as f64);
        let p = welch_p(t, df);
        assert!(p > 0.5, "expected a large p-value, got {p}");
    }

    #[test]
    fn completion_rate_extracts_one_or_zero() {
        let mut s = Session::new("t1", "s1", "a1", chrono::Utc::now());
        s.status = SessionStatus::Completed;
        let samples = metric_samples(Metric::CompletionRate, &[s]);
        assert_eq!(samples, vec![1.0]);
    }

    #[test]
    fn avg_duration_skips_sessions_without_ended_at() {
        let s = Session::new("t1", "s1", "a1", chrono::Utc::now());
        let samples = metric_samples(Metric::AvgDuration, &[s]);
        assert!(samples.is_empty());
    }
}
