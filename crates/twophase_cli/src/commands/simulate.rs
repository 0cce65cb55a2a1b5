//! Simulate command implementation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use twophase_engine::{
    Coordinator, CoordinatorConfig, CoordinatorStats, Participant, ParticipantConfig,
    ProxyConfig, TransactionLog,
};
use twophase_protocol::{ParticipantId, TransactionId, TransactionState, Vote};

/// Settings for one simulated round.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Number of participants, named `p1`..`pN`.
    pub participants: usize,
    /// Participants that vote ABORT.
    pub refuse: Vec<String>,
    /// Participants whose link is disconnected.
    pub silent: Vec<String>,
    /// Phase timeout.
    pub timeout: Duration,
    /// Poll interval.
    pub poll: Duration,
    /// Delivery delay applied to every link.
    pub delay: Option<Duration>,
    /// Transaction id; generated when absent.
    pub transaction: Option<String>,
    /// Durable log file; in-memory when absent.
    pub log: Option<PathBuf>,
}

/// Outcome of a simulated round.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Transaction ID.
    pub transaction_id: String,
    /// Final coordinator state.
    pub state: TransactionState,
    /// Error returned by the prepare call, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Votes received, by participant.
    pub votes: BTreeMap<String, Vote>,
    /// Participants that acknowledged the decision.
    pub acknowledged: Vec<String>,
    /// Wall time of the prepare call in milliseconds.
    pub elapsed_ms: u64,
    /// Log entries written for the transaction.
    pub log_entries: usize,
    /// Coordinator counters after the round.
    pub stats: StatsInfo,
}

/// Serializable copy of [`CoordinatorStats`].
#[derive(Debug, Serialize)]
pub struct StatsInfo {
    /// Transactions committed.
    pub committed: u64,
    /// Transactions aborted.
    pub aborted: u64,
    /// Prepare phases that timed out.
    pub vote_timeouts: u64,
    /// Commit phases that timed out.
    pub ack_timeouts: u64,
    /// Votes that arrived after the decision.
    pub late_votes: u64,
    /// Messages dropped by the coordinator.
    pub dropped_messages: u64,
}

impl From<CoordinatorStats> for StatsInfo {
    fn from(stats: CoordinatorStats) -> Self {
        Self {
            committed: stats.committed,
            aborted: stats.aborted,
            vote_timeouts: stats.vote_timeouts,
            ack_timeouts: stats.ack_timeouts,
            late_votes: stats.late_votes,
            dropped_messages: stats.dropped_messages,
        }
    }
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(simulate(options))?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text_output(&report),
    }
    Ok(())
}

/// Runs one transaction through prepare and returns what happened.
pub async fn simulate(
    options: &SimulateOptions,
) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let names: Vec<String> = (1..=options.participants).map(|i| format!("p{i}")).collect();
    for name in options.refuse.iter().chain(&options.silent) {
        if !names.contains(name) {
            return Err(format!("unknown participant: {name}").into());
        }
    }

    let log = match &options.log {
        Some(path) => TransactionLog::open(path)?,
        None => TransactionLog::in_memory(),
    };
    let config = CoordinatorConfig::new()
        .with_phase_timeout(options.timeout)
        .with_poll_interval(options.poll);
    let coordinator = Coordinator::new(config, log);

    let proxy_config = match options.delay {
        Some(delay) => ProxyConfig::new().with_delay(delay),
        None => ProxyConfig::new(),
    };
    let mut participants = Vec::with_capacity(names.len());
    for name in &names {
        let refuses = options.refuse.contains(name);
        let participant = Participant::spawn(
            name.as_str(),
            move |_: &TransactionId, _: &ParticipantId| !refuses,
            coordinator.handle(),
            ParticipantConfig::default(),
        );
        let proxy = participant.proxy(proxy_config.clone());
        if options.silent.contains(name) {
            proxy.set_connected(false);
        }
        coordinator.register_participant(name.as_str(), proxy);
        participants.push(participant);
    }

    let id = match &options.transaction {
        Some(id) => TransactionId::new(id.as_str()),
        None => TransactionId::generate(),
    };
    coordinator.begin_transaction(id.clone(), names.iter().map(String::as_str))?;

    let started = Instant::now();
    let result = coordinator.prepare(id.clone()).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let snapshot = coordinator
        .transaction(&id)
        .ok_or("transaction disappeared from the coordinator")?;
    info!(tx = %id, state = %snapshot.state(), elapsed_ms, "simulation finished");

    let mut acknowledged: Vec<String> = snapshot
        .acknowledged()
        .iter()
        .map(|p| p.as_str().to_string())
        .collect();
    acknowledged.sort();

    Ok(SimulationReport {
        transaction_id: id.as_str().to_string(),
        state: snapshot.state(),
        error: result.err().map(|e| e.to_string()),
        votes: snapshot
            .votes()
            .iter()
            .map(|(p, v)| (p.as_str().to_string(), *v))
            .collect(),
        acknowledged,
        elapsed_ms,
        log_entries: coordinator.log().entries(&id)?.len(),
        stats: coordinator.stats().into(),
    })
}

fn print_text_output(report: &SimulationReport) {
    println!("Transaction {} {}", report.transaction_id, report.state);
    println!("================");
    if let Some(ref error) = report.error {
        println!("error: {error}");
    }
    println!("elapsed: {} ms, log entries: {}", report.elapsed_ms, report.log_entries);
    println!();

    for (participant, vote) in &report.votes {
        let acked = report.acknowledged.contains(participant);
        println!(
            "  {participant:8} vote={:6} ack={}",
            match vote {
                Vote::Commit => "COMMIT",
                Vote::Abort => "ABORT",
            },
            if acked { "yes" } else { "no" }
        );
    }
    println!();
    println!(
        "committed={} aborted={} vote_timeouts={} ack_timeouts={} late_votes={}",
        report.stats.committed,
        report.stats.aborted,
        report.stats.vote_timeouts,
        report.stats.ack_timeouts,
        report.stats.late_votes
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(participants: usize) -> SimulateOptions {
        SimulateOptions {
            participants,
            refuse: Vec::new(),
            silent: Vec::new(),
            timeout: Duration::from_millis(300),
            poll: Duration::from_millis(10),
            delay: None,
            transaction: Some("tx-sim".to_string()),
            log: None,
        }
    }

    #[tokio::test]
    async fn unanimous_round_commits() {
        let report = simulate(&options(3)).await.unwrap();
        assert_eq!(report.state, TransactionState::Committed);
        assert!(report.error.is_none());
        assert_eq!(report.votes.len(), 3);
        assert_eq!(report.acknowledged, vec!["p1", "p2", "p3"]);
        assert_eq!(report.stats.committed, 1);
    }

    #[tokio::test]
    async fn refusal_aborts() {
        let mut opts = options(3);
        opts.refuse.push("p2".to_string());
        let report = simulate(&opts).await.unwrap();
        assert_eq!(report.state, TransactionState::Aborted);
        assert_eq!(report.votes.get("p2"), Some(&Vote::Abort));
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn silent_participant_times_out() {
        let mut opts = options(2);
        opts.silent.push("p1".to_string());
        let report = simulate(&opts).await.unwrap();
        assert_eq!(report.state, TransactionState::Aborted);
        assert!(!report.votes.contains_key("p1"));
        assert_eq!(report.stats.vote_timeouts, 1);
    }

    #[tokio::test]
    async fn rejects_unknown_names() {
        let mut opts = options(2);
        opts.refuse.push("p9".to_string());
        assert!(simulate(&opts).await.is_err());
    }

    #[test]
    fn durable_run_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(2);
        opts.log = Some(dir.path().join("sim.log"));
        run(&opts, "json").unwrap();

        let log = crate::commands::load_log(&dir.path().join("sim.log")).unwrap();
        assert_eq!(
            log.last_state(&TransactionId::new("tx-sim")),
            Some(TransactionState::Committed)
        );
    }
}
