//! Pending command implementation.

use serde::Serialize;
use std::path::Path;
use twophase_engine::decode_participants;
use twophase_log::TransactionLog;
use twophase_protocol::TransactionState;

/// A transaction whose decision may not have reached every participant.
#[derive(Debug, Serialize)]
pub struct PendingInfo {
    /// Transaction ID.
    pub transaction_id: String,
    /// Last logged state (`COMMITTING` or `ABORTING`).
    pub state: TransactionState,
    /// Participants recorded when the transaction began.
    pub participants: Vec<String>,
    /// Number of log entries for the transaction.
    pub entries: usize,
}

/// Runs the pending command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log = super::load_log(path)?;
    let pending = collect_pending(&log)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&pending)?),
        _ => {
            if pending.is_empty() {
                println!("No transactions awaiting recovery");
            }
            for info in &pending {
                println!(
                    "{} {} participants={} entries={}",
                    info.transaction_id,
                    info.state,
                    info.participants.join(","),
                    info.entries
                );
            }
        }
    }

    Ok(())
}

fn collect_pending(log: &TransactionLog) -> Result<Vec<PendingInfo>, Box<dyn std::error::Error>> {
    let mut pending = Vec::new();
    for id in log.pending_recovery() {
        let entries = log.entries(&id)?;
        let Some(state) = log.last_state(&id) else {
            continue;
        };
        let participants = match entries
            .iter()
            .find(|e| e.state == TransactionState::Initial)
        {
            Some(initial) => decode_participants(&initial.payload)?
                .into_iter()
                .map(|p| p.into_inner())
                .collect(),
            None => Vec::new(),
        };

        pending.push(PendingInfo {
            transaction_id: id.into_inner(),
            state,
            participants,
            entries: entries.len(),
        });
    }
    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use twophase_engine::{
        AlwaysCommit, ChannelProxy, Coordinator, CoordinatorConfig, Message, MessageType,
        Participant, ParticipantConfig, ParticipantProxy, ProxyConfig, TransportResult,
    };

    /// Loses every COMMIT, as if the participant crashed after voting.
    struct DropCommits(ChannelProxy);

    impl ParticipantProxy for DropCommits {
        fn deliver(&self, message: Message) -> TransportResult<()> {
            if message.message_type == MessageType::Commit {
                return Ok(());
            }
            self.0.deliver(message)
        }

        fn is_connected(&self) -> bool {
            self.0.is_connected()
        }
    }

    #[tokio::test]
    async fn lists_only_undelivered_decisions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coordinator.log");

        let coordinator = Coordinator::new(
            CoordinatorConfig::new()
                .with_phase_timeout(Duration::from_millis(200))
                .with_poll_interval(Duration::from_millis(10)),
            TransactionLog::open(&path).unwrap(),
        );
        let p1 = Participant::spawn(
            "p1",
            AlwaysCommit,
            coordinator.handle(),
            ParticipantConfig::default(),
        );
        coordinator.register_participant("p1", p1.proxy(ProxyConfig::default()));
        let p2 = Participant::spawn(
            "p2",
            AlwaysCommit,
            coordinator.handle(),
            ParticipantConfig::default(),
        );
        coordinator.register_participant("p2", DropCommits(p2.proxy(ProxyConfig::default())));

        coordinator.begin_transaction("tx-done", ["p1"]).unwrap();
        coordinator.prepare("tx-done").await.unwrap();

        coordinator.begin_transaction("tx-stuck", ["p1", "p2"]).unwrap();
        assert!(coordinator.prepare("tx-stuck").await.is_err());

        let log = crate::commands::load_log(&path).unwrap();
        let pending = collect_pending(&log).unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transaction_id, "tx-stuck");
        assert_eq!(pending[0].state, TransactionState::Committing);
        assert_eq!(pending[0].participants, vec!["p1", "p2"]);
        assert_eq!(pending[0].entries, 4);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("absent.log"), "text").is_err());
    }
}
