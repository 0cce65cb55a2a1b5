//! Dump log command implementation.

use serde::Serialize;
use std::path::Path;
use twophase_engine::decode_participants;
use twophase_log::TransactionLog;
use twophase_protocol::TransactionState;

/// Log entry representation for output.
#[derive(Debug, Serialize)]
pub struct LogRecordInfo {
    /// Offset in the log file.
    pub offset: u64,
    /// Transaction ID.
    pub transaction_id: String,
    /// State the transaction entered.
    pub state: TransactionState,
    /// Append time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Participant list (only on `INITIAL` entries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<String>>,
    /// Payload size in bytes.
    pub payload_size: usize,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    transaction: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let log = super::load_log(path)?;
    let records = read_log_records(&log, transaction, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

fn read_log_records(
    log: &TransactionLog,
    transaction: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<LogRecordInfo>, Box<dyn std::error::Error>> {
    let max_records = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();

    for item in log.iter() {
        if records.len() >= max_records {
            break;
        }
        let (offset, entry) = item?;
        if transaction.is_some_and(|id| entry.transaction_id.as_str() != id) {
            continue;
        }

        // Older or foreign INITIAL entries may carry no list.
        let participants = if entry.state == TransactionState::Initial {
            decode_participants(&entry.payload)
                .ok()
                .map(|ids| ids.into_iter().map(|p| p.into_inner()).collect())
        } else {
            None
        };

        records.push(LogRecordInfo {
            offset,
            transaction_id: entry.transaction_id.into_inner(),
            state: entry.state,
            timestamp: entry.timestamp,
            participants,
            payload_size: entry.payload.len(),
        });
    }

    Ok(records)
}

fn print_text_output(records: &[LogRecordInfo]) {
    println!("Log Entries ({} total)", records.len());
    println!("================");
    println!();

    for record in records {
        print!(
            "[{:08}] {:11} tx={} at={}",
            record.offset,
            record.state.as_str(),
            record.transaction_id,
            record.timestamp
        );
        if let Some(ref participants) = record.participants {
            print!(" participants={}", participants.join(","));
        } else if record.payload_size > 0 {
            print!(" payload={} bytes", record.payload_size);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twophase_engine::{
        AlwaysCommit, Coordinator, CoordinatorConfig, Participant, ParticipantConfig, ProxyConfig,
    };

    async fn sample_run() -> (Coordinator, Vec<Participant>) {
        let coordinator = Coordinator::in_memory(CoordinatorConfig::default());
        let mut participants = Vec::new();
        for id in ["p1", "p2"] {
            let participant = Participant::spawn(
                id,
                AlwaysCommit,
                coordinator.handle(),
                ParticipantConfig::default(),
            );
            coordinator.register_participant(id, participant.proxy(ProxyConfig::default()));
            participants.push(participant);
        }
        coordinator.begin_transaction("tx-1", ["p1", "p2"]).unwrap();
        coordinator.begin_transaction("tx-2", ["p2"]).unwrap();
        coordinator.abort("tx-1").await.unwrap();
        (coordinator, participants)
    }

    #[tokio::test]
    async fn filters_by_transaction() {
        let (coordinator, _participants) = sample_run().await;
        let records = read_log_records(coordinator.log(), Some("tx-1"), None).unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.transaction_id == "tx-1"));
        assert_eq!(
            records[0].participants,
            Some(vec!["p1".to_string(), "p2".to_string()])
        );
        assert_eq!(records[1].state, TransactionState::Aborting);
        assert!(records[1].participants.is_none());
        assert_eq!(records[2].state, TransactionState::Aborted);
    }

    #[tokio::test]
    async fn respects_limit() {
        let (coordinator, _participants) = sample_run().await;
        let records = read_log_records(coordinator.log(), None, Some(2)).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].transaction_id, "tx-2");
        assert!(records[1].offset > records[0].offset);
    }
}
