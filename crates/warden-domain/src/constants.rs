//! Label and annotation keys the controller reads and writes on nodes.
//!
//! Labels and annotations are the durable source of truth; everything else
//! (caches, chains, per-cycle client pools) is rebuildable from them.

/// Selects the maintenance profile(s) for a node. Multiple profiles are
/// separated by [`PROFILE_SEPARATOR`].
pub const PROFILE_LABEL: &str = "cloud.sap/maintenance-profile";

/// Current maintenance state of the node's first profile.
pub const STATE_LABEL: &str = "cloud.sap/maintenance-state";

/// Enables verbose per-node logging when set to `"true"`.
pub const LOG_DETAILS_LABEL: &str = "cloud.sap/maintenance-log-details";

/// Annotation holding the serialized per-node [`ProfileData`](crate::data::ProfileData) record.
pub const DATA_ANNOTATION: &str = "cloud.sap/maintenance-data";

/// Operator-supplied approval annotation, consumed by the `hasAnnotation` check.
pub const APPROVED_ANNOTATION: &str = "cloud.sap/maintenance-approved";

/// Hypervisor maintenance state of the host backing this node
/// (`true`/`false`/`alarm`/`unknown`).
pub const ESX_IN_MAINTENANCE_LABEL: &str = "cloud.sap/esx-in-maintenance";

/// Per-node opt-in for hypervisor-triggered shutdown.
pub const ESX_REBOOT_OK_LABEL: &str = "cloud.sap/esx-reboot-ok";

/// Annotation set when this controller initiated the VM shutdown. Start-up
/// only powers on VMs that carry it.
pub const ESX_REBOOT_INITIATED_ANNOTATION: &str = "cloud.sap/esx-reboot-initiated";

/// Hypervisor build version as reported by the HV API.
pub const ESX_VERSION_LABEL: &str = "cloud.sap/esx-version";

/// `"true"` when the node's kubelet version differs from the API server version.
pub const KUBELET_UPDATE_LABEL: &str = "cloud.sap/kubelet-needs-update";

/// Opt-in to drain the node and delete it together with its backing VM.
pub const DELETE_NODE_LABEL: &str = "cloud.sap/delete-node";

/// Physical host backing the node's VM.
pub const HOST_LABEL: &str = "kubernetes.cloud.sap/host";

/// Failure domain; its last character names the availability zone.
pub const FAILURE_DOMAIN_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";

/// Separator between profile names in [`PROFILE_LABEL`].
pub const PROFILE_SEPARATOR: &str = "--";

/// Profile assumed when a node carries no profile label.
pub const DEFAULT_PROFILE: &str = "default";

/// Annotation identifying static mirror pods; drain never touches these.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Event reason emitted on every profile state change.
pub const TRANSITION_EVENT_REASON: &str = "ChangedMaintenanceState";
