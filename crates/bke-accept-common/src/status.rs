//! Node and pod status classification
//!
//! Turns raw `Node`/`Pod` objects into read-only records and renders them as
//! the fixed-width table rows used in snapshots, the capture log and the
//! report. Records are rebuilt on every snapshot; nothing here is cached.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Node, Pod};

use crate::age::format_age_at;
use crate::{NO_ROLE, ROLE_LABEL_PREFIX};

/// Header row of the node table
pub const NODE_TABLE_HEADER: &str = "NAME       STATUS   ROLES         AGE   VERSION";

/// Header row of the pod table
pub const POD_TABLE_HEADER: &str =
    "NAMESPACE     NAME                                       READY   STATUS              RESTARTS   AGE";

const CONDITION_READY: &str = "Ready";
const CONDITION_CONTAINERS_READY: &str = "ContainersReady";
const STATUS_TRUE: &str = "True";
const REASON_CRASH_LOOP: &str = "CrashLoopBackOff";

// =============================================================================
// Nodes
// =============================================================================

/// Canonical node status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// A `Ready` condition with status `True` exists
    Ready,
    /// Anything else
    NotReady,
}

impl NodeStatus {
    /// Column text for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Ready => "Ready",
            NodeStatus::NotReady => "NotReady",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Projection of a `Node` as seen by one snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node name
    pub name: String,
    /// Whether a `Ready` condition reported `True`
    pub ready: bool,
    /// Role suffixes taken from `node-role.kubernetes.io/<role>` labels
    pub roles: BTreeSet<String>,
    /// Creation timestamp, if the server reported one
    pub created_at: Option<DateTime<Utc>>,
    /// Kubelet version
    pub version: String,
}

impl NodeRecord {
    /// Build a record from a Node returned by the API server
    pub fn from_node(node: &Node) -> Self {
        let status = node.status.as_ref();
        let ready = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == CONDITION_READY && c.status == STATUS_TRUE)
            })
            .unwrap_or(false);

        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            ready,
            roles: roles_from_labels(node.metadata.labels.as_ref()),
            created_at: node.metadata.creation_timestamp.as_ref().map(|t| t.0),
            version: status
                .and_then(|s| s.node_info.as_ref())
                .map(|info| info.kubelet_version.clone())
                .unwrap_or_default(),
        }
    }

    /// Canonical status of this node
    pub fn status(&self) -> NodeStatus {
        if self.ready {
            NodeStatus::Ready
        } else {
            NodeStatus::NotReady
        }
    }

    /// Comma-joined roles, or the `<none>` sentinel
    pub fn roles_label(&self) -> String {
        if self.roles.is_empty() {
            NO_ROLE.to_string()
        } else {
            self.roles.iter().cloned().collect::<Vec<_>>().join(",")
        }
    }

    /// Fixed-width table row, with age measured against `now`
    pub fn table_row(&self, now: &DateTime<Utc>) -> String {
        let mut row = String::new();
        push_cell(&mut row, &self.name, 10);
        push_cell(&mut row, self.status().as_str(), 9);
        push_cell(&mut row, &self.roles_label(), 14);
        push_cell(&mut row, &age_column(self.created_at.as_ref(), now), 6);
        row.push_str(&format!("{:<7}", self.version));
        row
    }
}

fn roles_from_labels(labels: Option<&BTreeMap<String, String>>) -> BTreeSet<String> {
    labels
        .into_iter()
        .flat_map(|l| l.keys())
        .filter_map(|key| key.strip_prefix(ROLE_LABEL_PREFIX))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Pods
// =============================================================================

/// Pod phase as reported by the API server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted but not all containers are running
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// All containers terminated, at least one in failure
    Failed,
    /// Phase missing or unrecognized
    Unknown,
}

impl PodPhase {
    /// Parse the phase string from `status.phase`
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Status shown in the STATUS column of the pod table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodStatus {
    /// At least one container is running and containers are ready
    Running,
    /// Phase `Pending`
    Pending,
    /// Phase `Succeeded`
    Succeeded,
    /// Phase `Failed`
    Failed,
    /// Phase missing or unrecognized
    Unknown,
    /// A container is waiting with reason `CrashLoopBackOff`
    CrashLoopBackOff,
    /// Looks running but the `ContainersReady` condition is not true
    Unavailable,
}

impl PodStatus {
    /// Column text for this status
    pub fn as_str(&self) -> &'static str {
        match self {
            PodStatus::Running => "Running",
            PodStatus::Pending => "Pending",
            PodStatus::Succeeded => "Succeeded",
            PodStatus::Failed => "Failed",
            PodStatus::Unknown => "Unknown",
            PodStatus::CrashLoopBackOff => "CrashLoopBackOff",
            PodStatus::Unavailable => "Unavailable",
        }
    }

    /// Whether this status counts as healthy in the component check
    pub fn is_healthy(&self) -> bool {
        matches!(self, PodStatus::Running | PodStatus::Succeeded)
    }
}

impl From<PodPhase> for PodStatus {
    fn from(phase: PodPhase) -> Self {
        match phase {
            PodPhase::Pending => PodStatus::Pending,
            PodPhase::Running => PodStatus::Running,
            PodPhase::Succeeded => PodStatus::Succeeded,
            PodPhase::Failed => PodStatus::Failed,
            PodPhase::Unknown => PodStatus::Unknown,
        }
    }
}

impl fmt::Display for PodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-container slice of a pod's status
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Container reports ready
    pub ready: bool,
    /// Container state is `running`
    pub running: bool,
    /// Reason of a `waiting` state, if any
    pub waiting_reason: Option<String>,
    /// Restart count
    pub restart_count: u32,
}

impl ContainerRecord {
    fn from_status(status: &ContainerStatus) -> Self {
        let state = status.state.as_ref();
        Self {
            ready: status.ready,
            running: state.is_some_and(|s| s.running.is_some()),
            waiting_reason: state
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.clone()),
            restart_count: u32::try_from(status.restart_count).unwrap_or(0),
        }
    }
}

/// Projection of a `Pod` as seen by one snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRecord {
    /// Namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Container statuses in API order
    pub containers: Vec<ContainerRecord>,
    /// Reported phase
    pub phase: PodPhase,
    /// Whether the pod-level `ContainersReady` condition is `True`
    pub containers_ready: bool,
    /// Creation timestamp, if the server reported one
    pub created_at: Option<DateTime<Utc>>,
}

impl PodRecord {
    /// Build a record from a Pod returned by the API server
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        let containers = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|cs| cs.iter().map(ContainerRecord::from_status).collect())
            .unwrap_or_default();
        let containers_ready = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == CONDITION_CONTAINERS_READY && c.status == STATUS_TRUE)
            })
            .unwrap_or(false);

        Self {
            namespace: pod.metadata.namespace.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            containers,
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            containers_ready,
            created_at: pod.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }

    /// Number of containers individually reporting ready
    pub fn ready_count(&self) -> usize {
        self.containers.iter().filter(|c| c.ready).count()
    }

    /// Total number of containers
    pub fn total_count(&self) -> usize {
        self.containers.len()
    }

    /// Highest restart count across containers
    pub fn restart_count(&self) -> u32 {
        self.containers
            .iter()
            .map(|c| c.restart_count)
            .max()
            .unwrap_or(0)
    }

    /// The STATUS column value.
    ///
    /// Order matters: a running container wins over the phase, a crash loop
    /// wins over both, and a pod that looks running without the
    /// `ContainersReady` condition is demoted to `Unavailable`.
    pub fn display_status(&self) -> PodStatus {
        let mut status = if self.containers.iter().any(|c| c.running) {
            PodStatus::Running
        } else {
            PodStatus::from(self.phase)
        };

        if self
            .containers
            .iter()
            .any(|c| c.waiting_reason.as_deref() == Some(REASON_CRASH_LOOP))
        {
            status = PodStatus::CrashLoopBackOff;
        }

        if !self.containers_ready && status == PodStatus::Running {
            status = PodStatus::Unavailable;
        }

        status
    }

    /// Fixed-width table row, with age measured against `now`
    pub fn table_row(&self, now: &DateTime<Utc>) -> String {
        let ready = format!("{}/{}", self.ready_count(), self.total_count());
        let mut row = String::new();
        push_cell(&mut row, &self.namespace, 13);
        push_cell(&mut row, &self.name, 43);
        push_cell(&mut row, &ready, ready.len() + 3);
        push_cell(&mut row, self.display_status().as_str(), 19);
        push_cell(&mut row, &self.restart_count().to_string(), 11);
        row.push_str(&format!("{:<8}", age_column(self.created_at.as_ref(), now)));
        row
    }
}

// =============================================================================
// Tables
// =============================================================================

/// Pad `text` to `width`. A value that fills or overflows its column still
/// gets one space so rows split back into the same columns on whitespace.
fn push_cell(row: &mut String, text: &str, width: usize) {
    row.push_str(text);
    let pad = width.saturating_sub(text.chars().count()).max(1);
    row.extend(std::iter::repeat(' ').take(pad));
}

fn age_column(created_at: Option<&DateTime<Utc>>, now: &DateTime<Utc>) -> String {
    match created_at {
        Some(ts) => format_age_at(ts, now),
        None => "<unknown>".to_string(),
    }
}

/// Render a node table (header plus one row per node)
pub fn render_node_table(nodes: &[NodeRecord], now: &DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str(NODE_TABLE_HEADER);
    out.push('\n');
    for node in nodes {
        out.push_str(&node.table_row(now));
        out.push('\n');
    }
    out
}

/// Render a pod table (header plus one row per pod)
pub fn render_pod_table(pods: &[PodRecord], now: &DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str(POD_TABLE_HEADER);
    out.push('\n');
    for pod in pods {
        out.push_str(&pod.table_row(now));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateWaiting, NodeCondition,
        NodeStatus as K8sNodeStatus, NodeSystemInfo, PodCondition, PodStatus as K8sPodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn node_condition(type_: &str, status: &str) -> NodeCondition {
        NodeCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    fn node(name: &str, conditions: Vec<NodeCondition>, labels: &[&str]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|l| (l.to_string(), String::new()))
                        .collect(),
                ),
                creation_timestamp: Some(Time(now() - Duration::minutes(75))),
                ..Default::default()
            },
            status: Some(K8sNodeStatus {
                conditions: Some(conditions),
                node_info: Some(NodeSystemInfo {
                    kubelet_version: "v1.25.6".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> Option<ContainerState> {
        Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        })
    }

    fn waiting(reason: &str) -> Option<ContainerState> {
        Some(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn container(ready: bool, state: Option<ContainerState>, restarts: i32) -> ContainerStatus {
        ContainerStatus {
            name: "c".to_string(),
            ready,
            restart_count: restarts,
            state,
            ..Default::default()
        }
    }

    fn pod(phase: &str, containers: Vec<ContainerStatus>, containers_ready: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some("kube-system".to_string()),
                name: Some("coredns-7d8f9c".to_string()),
                creation_timestamp: Some(Time(now() - Duration::minutes(42))),
                ..Default::default()
            },
            status: Some(K8sPodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(containers),
                conditions: Some(vec![PodCondition {
                    type_: "ContainersReady".to_string(),
                    status: if containers_ready { "True" } else { "False" }.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // ===== Nodes =====

    #[test]
    fn node_ready_regardless_of_condition_order() {
        let conditions = vec![
            node_condition("MemoryPressure", "False"),
            node_condition("DiskPressure", "False"),
            node_condition("Ready", "True"),
        ];
        let mut reversed = conditions.clone();
        reversed.reverse();

        for conds in [conditions, reversed] {
            let record = NodeRecord::from_node(&node("master-1", conds, &[]));
            assert_eq!(record.status(), NodeStatus::Ready);
        }
    }

    #[test]
    fn node_not_ready_when_ready_condition_false_or_missing() {
        let false_ready = node("w1", vec![node_condition("Ready", "False")], &[]);
        let unknown_ready = node("w2", vec![node_condition("Ready", "Unknown")], &[]);
        let no_ready = node("w3", vec![node_condition("PIDPressure", "True")], &[]);

        for n in [false_ready, unknown_ready, no_ready] {
            assert_eq!(NodeRecord::from_node(&n).status(), NodeStatus::NotReady);
        }
    }

    #[test]
    fn node_without_status_is_not_ready() {
        let mut n = node("w1", vec![], &[]);
        n.status = None;
        let record = NodeRecord::from_node(&n);
        assert_eq!(record.status(), NodeStatus::NotReady);
        assert!(record.version.is_empty());
    }

    #[test]
    fn node_roles_come_from_role_labels() {
        let n = node(
            "master-1",
            vec![node_condition("Ready", "True")],
            &[
                "node-role.kubernetes.io/master",
                "node-role.kubernetes.io/control-plane",
                "kubernetes.io/hostname",
            ],
        );
        let record = NodeRecord::from_node(&n);
        assert_eq!(record.roles_label(), "control-plane,master");
    }

    #[test]
    fn node_without_roles_uses_sentinel() {
        let n = node("worker-1", vec![], &["kubernetes.io/os"]);
        assert_eq!(NodeRecord::from_node(&n).roles_label(), "<none>");
    }

    #[test]
    fn node_row_is_fixed_width() {
        let n = node(
            "worker-3",
            vec![node_condition("Ready", "True")],
            &["node-role.kubernetes.io/node"],
        );
        let row = NodeRecord::from_node(&n).table_row(&now());
        assert_eq!(row, "worker-3  Ready    node          1h15m v1.25.6");
    }

    // ===== Pods =====

    #[test]
    fn single_ready_running_container_is_running() {
        let p = pod("Running", vec![container(true, running(), 0)], true);
        let record = PodRecord::from_pod(&p);
        assert_eq!(record.display_status(), PodStatus::Running);

        let row = record.table_row(&now());
        let columns: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(columns, ["kube-system", "coredns-7d8f9c", "1/1", "Running", "0", "0h42m"]);
    }

    #[test]
    fn running_without_containers_ready_is_unavailable() {
        let p = pod("Running", vec![container(false, running(), 0)], false);
        assert_eq!(PodRecord::from_pod(&p).display_status(), PodStatus::Unavailable);
    }

    #[test]
    fn running_phase_without_running_container_is_still_demoted() {
        let p = pod("Running", vec![container(false, None, 0)], false);
        assert_eq!(PodRecord::from_pod(&p).display_status(), PodStatus::Unavailable);
    }

    #[test]
    fn crash_loop_overrides_running_and_phase() {
        let crash_with_running = pod(
            "Running",
            vec![container(true, running(), 1), container(false, waiting("CrashLoopBackOff"), 7)],
            true,
        );
        let crash_pending = pod("Pending", vec![container(false, waiting("CrashLoopBackOff"), 3)], false);
        let crash_failed = pod("Failed", vec![container(false, waiting("CrashLoopBackOff"), 3)], true);

        for p in [crash_with_running, crash_pending, crash_failed] {
            assert_eq!(PodRecord::from_pod(&p).display_status(), PodStatus::CrashLoopBackOff);
        }
    }

    #[test]
    fn crash_loop_is_not_demoted_to_unavailable() {
        let p = pod("Running", vec![container(false, waiting("CrashLoopBackOff"), 2)], false);
        assert_eq!(PodRecord::from_pod(&p).display_status(), PodStatus::CrashLoopBackOff);
    }

    #[test]
    fn other_waiting_reasons_fall_back_to_phase() {
        let p = pod("Pending", vec![container(false, waiting("ContainerCreating"), 0)], false);
        assert_eq!(PodRecord::from_pod(&p).display_status(), PodStatus::Pending);
    }

    #[test]
    fn completed_job_is_succeeded() {
        let p = pod("Succeeded", vec![container(false, None, 0)], false);
        let record = PodRecord::from_pod(&p);
        assert_eq!(record.display_status(), PodStatus::Succeeded);
        assert!(record.display_status().is_healthy());
    }

    #[test]
    fn missing_phase_is_unknown() {
        let mut p = pod("Running", vec![], false);
        if let Some(status) = p.status.as_mut() {
            status.phase = None;
        }
        assert_eq!(PodRecord::from_pod(&p).display_status(), PodStatus::Unknown);
    }

    #[test]
    fn ready_ratio_and_max_restarts() {
        let p = pod(
            "Running",
            vec![
                container(true, running(), 2),
                container(false, running(), 9),
                container(true, running(), 4),
            ],
            false,
        );
        let record = PodRecord::from_pod(&p);
        assert_eq!(record.ready_count(), 2);
        assert_eq!(record.total_count(), 3);
        assert_eq!(record.restart_count(), 9);
    }

    #[test]
    fn pod_row_is_fixed_width() {
        let p = pod("Running", vec![container(true, running(), 0)], true);
        let row = PodRecord::from_pod(&p).table_row(&now());
        assert!(row.starts_with("kube-system  coredns-7d8f9c"));
        assert_eq!(&row[13..56].trim_end(), &"coredns-7d8f9c");
        assert_eq!(&row[56..62], "1/1   ");
        assert_eq!(row[62..81].trim_end(), "Running");
    }

    // ===== Tables =====

    #[test]
    fn tables_start_with_headers() {
        let nodes = vec![NodeRecord::from_node(&node("master-1", vec![], &[]))];
        let table = render_node_table(&nodes, &now());
        let mut lines = table.lines();
        assert_eq!(lines.next(), Some(NODE_TABLE_HEADER));
        assert!(lines.next().is_some_and(|l| l.starts_with("master-1")));

        let empty = render_pod_table(&[], &now());
        assert_eq!(empty, format!("{}\n", POD_TABLE_HEADER));
    }

    #[test]
    fn missing_creation_timestamp_renders_unknown_age() {
        let mut n = node("w1", vec![], &[]);
        n.metadata.creation_timestamp = None;
        let row = NodeRecord::from_node(&n).table_row(&now());
        let columns: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(columns, ["w1", "NotReady", "<none>", "<unknown>", "v1.25.6"]);
    }

    #[test]
    fn node_name_filling_its_column_stays_separated() {
        for name in ["worker-100", "worker-node-3", "bke-worker-node-long-name-17"] {
            let n = node(name, vec![node_condition("Ready", "True")], &[]);
            let row = NodeRecord::from_node(&n).table_row(&now());
            let columns: Vec<&str> = row.split_whitespace().collect();
            assert_eq!(columns, [name, "Ready", "<none>", "1h15m", "v1.25.6"]);
        }
    }

    #[test]
    fn long_namespace_and_pod_name_stay_separated() {
        let long_name = "ingress-nginx-controller-5d7b8c6f4d-abcdefghijk";
        assert!(long_name.len() > 43);

        for (namespace, name) in [
            ("ingress-nginx", "coredns-7d8f9c"),
            ("kubernetes-dashboard", long_name),
            ("calico-system", "calico-kube-controllers-6b9fbfff44-x7k2pqrs"),
        ] {
            let mut p = pod("Running", vec![container(true, running(), 0)], true);
            p.metadata.namespace = Some(namespace.to_string());
            p.metadata.name = Some(name.to_string());
            let row = PodRecord::from_pod(&p).table_row(&now());
            let columns: Vec<&str> = row.split_whitespace().collect();
            assert_eq!(columns, [namespace, name, "1/1", "Running", "0", "0h42m"]);
        }
    }
}
