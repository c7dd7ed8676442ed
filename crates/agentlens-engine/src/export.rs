//! Compliance export (spec §4.13, C14): stream the event log for a tenant
//! and time range to CSV or JSON in fixed-size batches, never holding more
//! than one batch in memory. CSV quoting is delegated to the `csv` crate
//! (RFC 4180 by default); JSON is written incrementally field-by-field so
//! `events` never materializes as a single in-memory `Vec`.

use agentlens_store::{EventFilter, Store};
use agentlens_types::{AgentLensError, Event, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

pub const BATCH_SIZE: u32 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

fn io_err(e: std::io::Error) -> AgentLensError {
    AgentLensError::Storage(e.to_string())
}

fn csv_err(e: csv::Error) -> AgentLensError {
    AgentLensError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> AgentLensError {
    AgentLensError::Storage(e.to_string())
}

fn csv_record(event: &Event) -> Result<Vec<String>> {
    Ok(vec![
        event.id.to_string(),
        event.tenant_id.clone(),
        event.session_id.clone(),
        event.agent_id.clone(),
        event.event_type.as_str().to_string(),
        event.severity.as_str().to_string(),
        event.timestamp.to_rfc3339(),
        serde_json::to_string(&event.payload).map_err(json_err)?,
        event.hash.clone(),
    ])
}

/// Streams a tenant's event log to CSV or JSON (spec §4.13).
pub struct ExportEngine {
    store: Arc<dyn Store>,
}

impl ExportEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn export<W: AsyncWrite + Unpin>(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        format: ExportFormat,
        sink: &mut W,
    ) -> Result<u64> {
        match format {
            ExportFormat::Csv => self.export_csv(tenant_id, from, to, sink).await,
            ExportFormat::Json => self.export_json(tenant_id, from, to, sink).await,
        }
    }

    async fn export_csv<W: AsyncWrite + Unpin>(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sink: &mut W,
    ) -> Result<u64> {
        sink.write_all(&[0xEF, 0xBB, 0xBF]).await.map_err(io_err)?;
        sink.write_all(b"id,tenant_id,session_id,agent_id,event_type,severity,timestamp,payload,hash\n")
            .await
            .map_err(io_err)?;

        let mut total = 0u64;
        let mut offset = 0u32;
        loop {
            let filter = EventFilter {
                since: Some(from),
                until: Some(to),
                limit: BATCH_SIZE,
                offset,
                ..Default::default()
            };
            let batch = self.store.query_events(tenant_id, &filter).await?;
            if batch.is_empty() {
                break;
            }
            let mut buf = Vec::new();
            {
                let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut buf);
                for event in &batch {
                    writer.write_record(&csv_record(event)?).map_err(csv_err)?;
                }
                writer.flush().map_err(io_err)?;
            }
            sink.write_all(&buf).await.map_err(io_err)?;
            total += batch.len() as u64;
            offset += batch.len() as u32;
            if (batch.len() as u32) < BATCH_SIZE {
                break;
            }
        }
        Ok(total)
    }

    async fn export_json<W: AsyncWrite + Unpin>(
        &self,
        tenant_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sink: &mut W,
    ) -> Result<u64> {
        sink.write_all(b"{\"exportedAt\":").await.map_err(io_err)?;
        sink.write_all(serde_json::to_string(&Utc::now()).map_err(json_err)?.as_bytes())
            .await
            .map_err(io_err)?;
        sink.write_all(b",\"range\":{\"from\":").await.map_err(io_err)?;
        sink.write_all(serde_json::to_string(&from).map_err(json_err)?.as_bytes()).await.map_err(io_err)?;
        sink.write_all(b",\"to\":").await.map_err(io_err)?;
        sink.write_all(serde_json::to_string(&to).map_err(json_err)?.as_bytes()).await.map_err(io_err)?;
        sink.write_all(b"},\"events\":[").await.map_err(io_err)?;

        let mut total = 0u64;
        let mut offset = 0u32;
        let mut first = true;
        loop {
            let filter = EventFilter {
                since: Some(from),
                until: Some(to),
                limit: BATCH_SIZE,
                offset,
                ..Default::default()
            };
            let batch = self.store.query_events(tenant_id, &filter).await?;
            if batch.is_empty() {
                break;
            }
            for event in &batch {
                if !first {
                    sink.write_all(b",").await.map_err(io_err)?;
                }
                first = false;
                sink.write_all(&serde_json::to_vec(event).map_err(json_err)?).await.map_err(io_err)?;
            }
            total += batch.len() as u64;
            offset += batch.len() as u32;
            if (batch.len() as u32) < BATCH_SIZE {
                break;
            }
        }
        sink.write_all(format!("],\"totalEvents\":{total}}}").as_bytes()).await.map_err(io_err)?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_store::MemoryStore;
    use agentlens_types::{EventType, Severity};
    use ulid::Ulid;

    fn event(tenant: &str, payload_with_comma: bool) -> Event {
        let mut e = Event {
            id: Ulid::new(),
            tenant_id: tenant.into(),
            timestamp: Utc::now(),
            session_id: "s1".into(),
            agent_id: "a1".into(),
            event_type: EventType::ToolCall,
            severity: Severity::Info,
            payload: if payload_with_comma {
                serde_json::json!({"note": "a, b \"c\""})
            } else {
                serde_json::json!({"tool": "search"})
            },
            metadata: None,
            prev_hash: None,
            hash: String::new(),
        };
        e.hash = e.compute_hash();
        e
    }

    #[tokio::test]
    async fn csv_export_emits_bom_header_and_quotes_special_fields() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.append_event(&event("t1", true)).await.unwrap();
        let engine = ExportEngine::new(store);
        let mut buf = Vec::new();
        let total = engine
            .export("t1", Utc::now() - chrono::Duration::hours(1), Utc::now() + chrono::Duration::hours(1), ExportFormat::Csv, &mut buf)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(&buf[0..3], &[0xEF, 0xBB, 0xBF]);
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("id,tenant_id,session_id"));
        assert!(text.contains("\"\"c\"\"")); // doubled internal quote
    }

    #[tokio::test]
    async fn json_export_produces_valid_envelope() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.append_event(&event("t1", false)).await.unwrap();
        store.append_event(&event("t1", false)).await.unwrap();
        let engine = ExportEngine::new(store);
        let mut buf = Vec::new();
        let total = engine
            .export("t1", Utc::now() - chrono::Duration::hours(1), Utc::now() + chrono::Duration::hours(1), ExportFormat::Json, &mut buf)
            .await
            .unwrap();
        assert_eq!(total, 2);
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed["totalEvents"], 2);
        assert_eq!(parsed["events"].as_array().unwrap().len(), 2);
    }
}
