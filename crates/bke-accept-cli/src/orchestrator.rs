//! Acceptance run state machine
//!
//! Phases run strictly in order:
//!
//! ```text
//! Created -> NodesFetched -> DeployChecked -> PodsFetched -> ComponentChecked
//!         -> ScaledDown -> ScaledUp -> Deleted -> CleanedUp
//! ```
//!
//! Any error aborts the run. A scale phase that does not converge in time
//! is recorded as `failed` in its report section and the run carries on.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use bke_accept_common::capture::CaptureLog;
use bke_accept_common::kube_utils::ClusterQuery;
use bke_accept_common::patcher::{ConfigPatcher, SpecStore};
use bke_accept_common::poll::{
    node_absent, node_present, poll_for_convergence, table_rows, PollConfig, PollOutcome,
    SnapshotSource, Verdict,
};
use bke_accept_common::report::{Marker, ReportWriter, TestReport};
use bke_accept_common::spec_doc::NodeEntry;
use bke_accept_common::status::{
    render_node_table, render_pod_table, NODE_TABLE_HEADER, POD_TABLE_HEADER,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::commands::settle;
use crate::config::AcceptanceConfig;
use crate::{Error, Result};

/// Report section for the node readiness check on the bootstrap output
pub const DEPLOY_SECTION: &str = "Cluster deployment test";
/// Report section for the pod status check
pub const COMPONENT_SECTION: &str = "Component installation test";
/// Report section for removing the scale node
pub const SCALE_DOWN_SECTION: &str = "Cluster scale-down test";
/// Report section for adding the scale node back
pub const SCALE_UP_SECTION: &str = "Cluster scale-up test";
/// Report section for the delete request
pub const DELETE_SECTION: &str = "Cluster deletion test";

const HEALTHY_POD_STATUSES: [&str; 2] = ["Running", "Succeeded"];
const STATUS_COLUMN: usize = 3;

/// Where the run currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Cluster bootstrapped, nothing checked yet
    Created,
    /// Node table appended to the capture log
    NodesFetched,
    /// Deployment section written
    DeployChecked,
    /// Pod table appended to the capture log
    PodsFetched,
    /// Component section written
    ComponentChecked,
    /// Scale-down section written
    ScaledDown,
    /// Scale-up section written
    ScaledUp,
    /// Delete requested
    Deleted,
    /// Capture log handled, report complete
    CleanedUp,
}

impl Phase {
    /// The phase that follows this one
    pub fn next(self) -> Option<Phase> {
        use Phase::*;
        match self {
            Created => Some(NodesFetched),
            NodesFetched => Some(DeployChecked),
            DeployChecked => Some(PodsFetched),
            PodsFetched => Some(ComponentChecked),
            ComponentChecked => Some(ScaledDown),
            ScaledDown => Some(ScaledUp),
            ScaledUp => Some(Deleted),
            Deleted => Some(CleanedUp),
            CleanedUp => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-run knobs taken from the configuration
#[derive(Clone, Debug)]
pub struct RunSettings {
    /// Prefix of the cluster resource annotations
    pub annotation_prefix: String,
    /// Prefix of per-node lines in the bootstrap output
    pub node_log_marker: String,
    /// Text in a node line that fails the deployment check
    pub node_not_ready_text: String,
    /// Node removed and re-added by the scale phases
    pub scale_node: String,
    /// Entry added during scale-up instead of the removed one
    pub scale_node_entry: Option<NodeEntry>,
    /// Wait after each scale patch before polling
    pub settle_after_patch: Duration,
    /// Poll window for both scale phases
    pub poll: PollConfig,
    /// Leave the capture log on disk after the run
    pub keep_capture: bool,
}

impl RunSettings {
    /// Copy the run knobs out of a validated configuration
    pub fn from_config(config: &AcceptanceConfig, keep_capture: bool) -> Result<Self> {
        Ok(Self {
            annotation_prefix: config.annotation_prefix.clone(),
            node_log_marker: config.node_log_marker.clone(),
            node_not_ready_text: config.node_not_ready_text.clone(),
            scale_node: config.scale_node.clone(),
            scale_node_entry: config.scale_node_entry.clone(),
            settle_after_patch: config.timing.settle_after_patch(),
            poll: config.timing.poll()?,
            keep_capture,
        })
    }
}

/// What a finished run hands back
#[derive(Debug)]
pub struct RunResult<W> {
    /// Everything written to the report
    pub report: TestReport,
    /// The report sink
    pub sink: W,
}

/// Drives one acceptance run over an already created cluster
pub struct Orchestrator<Q: ClusterQuery, S: SpecStore, W: Write> {
    query: Q,
    patcher: ConfigPatcher<S>,
    capture: CaptureLog,
    report: ReportWriter<W>,
    settings: RunSettings,
    phase: Phase,
    removed: Option<NodeEntry>,
}

impl<Q: ClusterQuery, S: SpecStore, W: Write> Orchestrator<Q, S, W> {
    /// Start in [`Phase::Created`]; `capture` already holds the bootstrap output
    pub fn new(
        query: Q,
        store: S,
        capture: CaptureLog,
        report: ReportWriter<W>,
        settings: RunSettings,
    ) -> Self {
        let patcher = ConfigPatcher::with_annotation_prefix(store, &settings.annotation_prefix);
        Self {
            query,
            patcher,
            capture,
            report,
            settings,
            phase: Phase::Created,
            removed: None,
        }
    }

    /// Last completed phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run every remaining phase in order
    pub async fn run(mut self) -> Result<RunResult<W>> {
        self.fetch_nodes().await?;
        self.check_deploy()?;
        self.fetch_pods().await?;
        self.check_components()?;
        self.scale_down().await?;
        self.scale_up().await?;
        self.delete_cluster().await?;
        self.cleanup()
    }

    fn advance(&mut self, to: Phase) -> Result<()> {
        if self.phase.next() != Some(to) {
            return Err(Error::command_failed(format!(
                "cannot move from {} to {}",
                self.phase, to
            )));
        }
        self.phase = to;
        info!(phase = %to, "Phase complete");
        Ok(())
    }

    async fn fetch_nodes(&mut self) -> Result<()> {
        let nodes = self.query.list_nodes().await?;
        self.capture
            .write_text(&render_node_table(&nodes, &Utc::now()))?;
        self.advance(Phase::NodesFetched)
    }

    fn check_deploy(&mut self) -> Result<()> {
        self.report.begin_section(DEPLOY_SECTION)?;
        let log = self.capture.contents()?;
        match deploy_findings(
            &log,
            &self.settings.node_log_marker,
            &self.settings.node_not_ready_text,
        ) {
            Some(lines) => {
                warn!(count = lines.len(), "Nodes reported not ready during creation");
                self.report.line(NODE_TABLE_HEADER)?;
                for line in lines {
                    self.report.line(line)?;
                }
                self.report.finish_section(Marker::Failed)?;
            }
            None => self.report.finish_section(Marker::Success)?,
        }
        self.advance(Phase::DeployChecked)
    }

    async fn fetch_pods(&mut self) -> Result<()> {
        let pods = self.query.list_pods().await?;
        self.capture
            .write_text(&render_pod_table(&pods, &Utc::now()))?;
        self.advance(Phase::PodsFetched)
    }

    fn check_components(&mut self) -> Result<()> {
        self.report.begin_section(COMPONENT_SECTION)?;
        let log = self.capture.contents()?;
        let rows = unhealthy_pod_rows(&log);
        if rows.is_empty() {
            self.report.finish_section(Marker::Success)?;
        } else {
            warn!(count = rows.len(), "Pods not running");
            self.report.line(POD_TABLE_HEADER)?;
            for row in rows {
                self.report.line(row)?;
            }
            self.report.finish_section(Marker::Failed)?;
        }
        self.advance(Phase::ComponentChecked)
    }

    async fn scale_down(&mut self) -> Result<()> {
        self.report.begin_section(SCALE_DOWN_SECTION)?;
        let (entry, receipt) = self.patcher.remove_node(&self.settings.scale_node).await?;
        debug!(output = %receipt.output.trim(), "Scale-down spec applied");
        self.removed = Some(entry);
        settle(self.settings.settle_after_patch, "for the scale-down to start").await;

        let mut source = NodeSnapshot {
            query: &self.query,
            capture: &mut self.capture,
        };
        let outcome = poll_for_convergence(
            &mut source,
            node_absent(&self.settings.scale_node),
            &self.settings.poll,
            "scale-down",
        )
        .await?;
        self.record(outcome)?;
        self.advance(Phase::ScaledDown)
    }

    async fn scale_up(&mut self) -> Result<()> {
        self.report.begin_section(SCALE_UP_SECTION)?;
        let entry = self
            .settings
            .scale_node_entry
            .clone()
            .or_else(|| self.removed.clone())
            .ok_or_else(|| Error::validation("no node entry to add back during scale-up"))?;
        let receipt = self.patcher.add_node(&entry).await?;
        debug!(output = %receipt.output.trim(), "Scale-up spec applied");
        settle(self.settings.settle_after_patch, "for the scale-up to start").await;

        let mut source = NodeSnapshot {
            query: &self.query,
            capture: &mut self.capture,
        };
        let outcome = poll_for_convergence(
            &mut source,
            node_present(&self.settings.scale_node),
            &self.settings.poll,
            "scale-up",
        )
        .await?;
        self.record(outcome)?;
        self.advance(Phase::ScaledUp)
    }

    async fn delete_cluster(&mut self) -> Result<()> {
        self.report.begin_section(DELETE_SECTION)?;
        self.patcher.disable_delete_protection().await?;
        let output = self.patcher.store().delete().await?;
        info!(output = %output.trim(), "Cluster delete requested");
        self.report.finish_section(Marker::Success)?;
        self.advance(Phase::Deleted)
    }

    fn cleanup(mut self) -> Result<RunResult<W>> {
        self.advance(Phase::CleanedUp)?;
        let Self {
            capture,
            report,
            settings,
            ..
        } = self;
        if settings.keep_capture {
            info!(path = %capture.path().display(), "Keeping capture log");
        } else {
            capture.remove()?;
        }
        Ok(RunResult {
            report: report.report().clone(),
            sink: report.into_inner(),
        })
    }

    /// Close a scale section from a poll outcome
    fn record(&mut self, outcome: PollOutcome) -> Result<()> {
        match outcome.verdict() {
            Verdict::Converged => self.report.finish_section(Marker::Success)?,
            Verdict::TimedOut => {
                for row in table_rows(&outcome.last_snapshot) {
                    self.report.line(row)?;
                }
                self.report.finish_section(Marker::Failed)?;
            }
            Verdict::TimedOutEmpty => {
                error!(node = %self.settings.scale_node, "No nodes listed when the poll gave up");
                self.report.finish_section(Marker::Failed)?;
            }
        }
        Ok(())
    }
}

/// Node table snapshots written into the capture log, replacing the last one
struct NodeSnapshot<'a, Q> {
    query: &'a Q,
    capture: &'a mut CaptureLog,
}

#[async_trait]
impl<Q: ClusterQuery> SnapshotSource for NodeSnapshot<'_, Q> {
    async fn snapshot(&mut self) -> bke_accept_common::Result<String> {
        self.capture.reset()?;
        let nodes = self.query.list_nodes().await?;
        let table = render_node_table(&nodes, &Utc::now());
        self.capture.write_text(&table)?;
        Ok(table)
    }
}

/// Every marker line of the bootstrap output if any of them reports a node
/// as not ready. The message is the text after the second `]`.
pub fn deploy_findings<'a>(log: &'a str, marker: &str, not_ready: &str) -> Option<Vec<&'a str>> {
    let lines: Vec<&str> = log.lines().filter(|l| l.contains(marker)).collect();
    let any_not_ready = lines.iter().any(|line| {
        line.splitn(3, ']')
            .nth(2)
            .is_some_and(|message| message.contains(not_ready))
    });
    any_not_ready.then_some(lines)
}

/// Rows of the first pod table in `log` whose STATUS is neither `Running`
/// nor `Succeeded`
pub fn unhealthy_pod_rows(log: &str) -> Vec<&str> {
    log.lines()
        .skip_while(|line| line.trim_end() != POD_TABLE_HEADER)
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter(|row| {
            row.split_whitespace()
                .nth(STATUS_COLUMN)
                .map_or(true, |status| !HEALTHY_POD_STATUSES.contains(&status))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bke_accept_common::status::{ContainerRecord, PodPhase, PodRecord};

    #[test]
    fn phases_advance_in_order() {
        let mut phase = Phase::Created;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 9);
        assert_eq!(phase, Phase::CleanedUp);
    }

    #[test]
    fn ready_nodes_have_no_deploy_findings() {
        let log = "[bke-node] [master-1] Node is ready\n[bke-node] [worker-3] Node is ready\n";
        assert!(deploy_findings(log, "[bke-node]", "Node is not ready").is_none());
    }

    #[test]
    fn one_unready_node_reports_every_marker_line() {
        let log = "creating\n[bke-node] [master-1] Node is ready\n[bke-node] [worker-3] Node is not ready\n";
        let lines = deploy_findings(log, "[bke-node]", "Node is not ready").unwrap();
        assert_eq!(
            lines,
            [
                "[bke-node] [master-1] Node is ready",
                "[bke-node] [worker-3] Node is not ready"
            ]
        );
    }

    #[test]
    fn not_ready_text_in_the_node_name_is_ignored() {
        let log = "[bke-node] [Node is not ready] ok\n";
        assert!(deploy_findings(log, "[bke-node]", "Node is not ready").is_none());
    }

    #[test]
    fn healthy_pod_table_has_no_rows() {
        let log = format!(
            "{}\n{}\n{}\n",
            POD_TABLE_HEADER,
            "kube-system  coredns-7d8f9c  1/1  Running  0  0h42m",
            "kube-system  job-init-x  0/1  Succeeded  0  0h42m",
        );
        assert!(unhealthy_pod_rows(&log).is_empty());
    }

    #[test]
    fn unhealthy_rows_are_collected_by_status_column() {
        let log = format!(
            "NAME STATUS\nnode-a Ready\n{}\n{}\n{}\n{}\n",
            POD_TABLE_HEADER,
            "kube-system  coredns-7d8f9c  1/1  Running  0  0h42m",
            "kube-system  calico-node-x  0/1  CrashLoopBackOff  7  0h42m",
            "kube-system  Running-init  0/1  Pending  0  0h1m",
        );
        let rows = unhealthy_pod_rows(&log);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("CrashLoopBackOff"));
        assert!(rows[1].contains("Pending"));
    }

    fn pod(namespace: &str, name: &str, running: bool) -> PodRecord {
        PodRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            containers: vec![ContainerRecord {
                ready: running,
                running,
                waiting_reason: None,
                restart_count: 0,
            }],
            phase: if running { PodPhase::Running } else { PodPhase::Pending },
            containers_ready: running,
            created_at: None,
        }
    }

    #[test]
    fn rendered_rows_with_column_filling_names_are_classified() {
        let exact_name = "calico-kube-controllers-6b9fbfff44-x7k2pqrs";
        let long_name = "ingress-nginx-admission-create-5d7b8c6f4d-abcdefghijk";
        assert_eq!(exact_name.len(), 43);
        assert!(long_name.len() > 43);

        let pods = [
            pod("ingress-nginx", "ingress-nginx-controller-5d7b8", true),
            pod("calico-system", exact_name, true),
            pod("kubernetes-dashboard", long_name, true),
            pod("kubernetes-dashboard", "dashboard-metrics-scraper-7bc8", false),
        ];
        let log = render_pod_table(&pods, &Utc::now());

        let rows = unhealthy_pod_rows(&log);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].starts_with("kubernetes-dashboard dashboard-metrics-scraper-7bc8"));
        assert!(rows[0].contains("Pending"));
    }

    #[test]
    fn missing_pod_table_has_no_rows() {
        assert!(unhealthy_pod_rows("[bke-node] [master-1] Node is ready\n").is_empty());
    }
}
