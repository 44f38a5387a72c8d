//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every threshold in the decision pipeline is a knob here; code never
//! hard-codes a timer or distance.

use crate::domain::geometry::Point;
use crate::domain::types::{AnchorLogic, ExaminationMode};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    /// Max first-seen difference for group formation (seconds)
    #[serde(default = "default_t_group")]
    pub t_group: f64,
    /// Max center distance for group membership (normalized)
    #[serde(default = "default_d_max")]
    pub d_max: f64,
    /// Group age before it is considered stable (seconds)
    #[serde(default = "default_t_lock")]
    pub t_lock: f64,
    /// Sustained separation before a group splits (seconds)
    #[serde(default = "default_t_break")]
    pub t_break: f64,
    /// Min IoU alternative to the distance criterion
    #[serde(default = "default_group_iou_min")]
    pub iou_min: f64,
}

fn default_t_group() -> f64 {
    2.0
}
fn default_d_max() -> f64 {
    0.15
}
fn default_t_lock() -> f64 {
    1.0
}
fn default_t_break() -> f64 {
    2.0
}
fn default_group_iou_min() -> f64 {
    0.02
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            t_group: default_t_group(),
            d_max: default_d_max(),
            t_lock: default_t_lock(),
            t_break: default_t_break(),
            iou_min: default_group_iou_min(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Gate-area dwell before a visitor is ready for examination (seconds)
    #[serde(default = "default_presence_to_check")]
    pub presence_to_check: f64,
    /// Guard-member proximity required before examination starts (seconds)
    #[serde(default = "default_proximity_min")]
    pub proximity_min: f64,
    /// Minimum examination duration for individuals (seconds)
    #[serde(default = "default_check_min_individual")]
    pub check_min_individual: f64,
    /// Minimum examination duration for groups (seconds)
    #[serde(default = "default_check_min_batch")]
    pub check_min_batch: f64,
    /// Minimum accumulated contact time for a completed check (seconds)
    #[serde(default = "default_interaction_min")]
    pub interaction_min: f64,
}

fn default_presence_to_check() -> f64 {
    6.0
}
fn default_proximity_min() -> f64 {
    2.0
}
fn default_check_min_individual() -> f64 {
    3.0
}
fn default_check_min_batch() -> f64 {
    4.0
}
fn default_interaction_min() -> f64 {
    1.2
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            presence_to_check: default_presence_to_check(),
            proximity_min: default_proximity_min(),
            check_min_individual: default_check_min_individual(),
            check_min_batch: default_check_min_batch(),
            interaction_min: default_interaction_min(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Anchor dwell before a guard qualifies (seconds)
    #[serde(default = "default_guard_ready")]
    pub guard_ready: f64,
    /// Absence from anchor before a guard dequalifies (seconds)
    #[serde(default = "default_t_vacate")]
    pub t_vacate: f64,
    /// Window for anchor re-entry before guard state is discarded (seconds)
    #[serde(default = "default_t_rejoin")]
    pub t_rejoin: f64,
    #[serde(default = "default_anchor_logic")]
    pub anchor_logic: AnchorLogic,
}

fn default_guard_ready() -> f64 {
    3.0
}
fn default_t_vacate() -> f64 {
    2.0
}
fn default_t_rejoin() -> f64 {
    10.0
}
fn default_anchor_logic() -> AnchorLogic {
    AnchorLogic::Either
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            guard_ready: default_guard_ready(),
            t_vacate: default_t_vacate(),
            t_rejoin: default_t_rejoin(),
            anchor_logic: default_anchor_logic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Soft warning threshold for waiting tickets (seconds)
    #[serde(default = "default_t_warn")]
    pub t_warn: f64,
    /// Hard escalation threshold for waiting tickets (seconds)
    #[serde(default = "default_t_max_wait")]
    pub t_max_wait: f64,
}

fn default_t_warn() -> f64 {
    30.0
}
fn default_t_max_wait() -> f64 {
    45.0
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { t_warn: default_t_warn(), t_max_wait: default_t_max_wait() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_high_conf")]
    pub high_conf: f64,
    #[serde(default = "default_low_conf")]
    pub low_conf: f64,
    /// IoU gate for the high-confidence association pass
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,
    /// Stricter IoU gate for the low-confidence rescue pass
    #[serde(default = "default_low_conf_iou_threshold")]
    pub low_conf_iou_threshold: f64,
    #[serde(default = "default_min_hits")]
    pub min_hits: u32,
    /// Frames a track survives without a matching detection
    #[serde(default = "default_max_age")]
    pub max_age: u32,
}

fn default_high_conf() -> f64 {
    0.5
}
fn default_low_conf() -> f64 {
    0.2
}
fn default_iou_threshold() -> f64 {
    0.3
}
fn default_low_conf_iou_threshold() -> f64 {
    0.4
}
fn default_min_hits() -> u32 {
    3
}
fn default_max_age() -> u32 {
    30
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            high_conf: default_high_conf(),
            low_conf: default_low_conf(),
            iou_threshold: default_iou_threshold(),
            low_conf_iou_threshold: default_low_conf_iou_threshold(),
            min_hits: default_min_hits(),
            max_age: default_max_age(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_pose_enabled")]
    pub enabled: bool,
    /// Wrist-to-torso distance margin as a fraction of guard height
    #[serde(default = "default_hand_to_torso_margin")]
    pub hand_to_torso_margin: f64,
    /// Radial wrist velocity toward the guard torso (normalized units/s)
    #[serde(default = "default_reach_velocity_thresh")]
    pub reach_velocity_thresh: f64,
    /// Sustained approach duration for a reach gesture (seconds)
    #[serde(default = "default_reach_min_duration")]
    pub reach_min_duration: f64,
    /// Minimum keypoint visibility to use a joint
    #[serde(default = "default_keypoint_visibility")]
    pub keypoint_visibility: f64,
}

fn default_pose_enabled() -> bool {
    true
}
fn default_hand_to_torso_margin() -> f64 {
    0.12
}
fn default_reach_velocity_thresh() -> f64 {
    0.6
}
fn default_reach_min_duration() -> f64 {
    0.25
}
fn default_keypoint_visibility() -> f64 {
    0.3
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            enabled: default_pose_enabled(),
            hand_to_torso_margin: default_hand_to_torso_margin(),
            reach_velocity_thresh: default_reach_velocity_thresh(),
            reach_min_duration: default_reach_min_duration(),
            keypoint_visibility: default_keypoint_visibility(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoreConfig {
    #[serde(default = "default_score_base")]
    pub base: f64,
    #[serde(default = "default_contact_bonus")]
    pub contact_bonus: f64,
    #[serde(default = "default_pose_bonus")]
    pub pose_bonus: f64,
    #[serde(default = "default_persist_bonus")]
    pub persist_bonus: f64,
    #[serde(default = "default_score_threshold")]
    pub threshold: f64,
}

fn default_score_base() -> f64 {
    0.6
}
fn default_contact_bonus() -> f64 {
    0.2
}
fn default_pose_bonus() -> f64 {
    0.15
}
fn default_persist_bonus() -> f64 {
    0.05
}
fn default_score_threshold() -> f64 {
    0.9
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            base: default_score_base(),
            contact_bonus: default_contact_bonus(),
            pose_bonus: default_pose_bonus(),
            persist_bonus: default_persist_bonus(),
            threshold: default_score_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProximityConfig {
    /// Height-normalized center distance under which two people are in
    /// contact
    #[serde(default = "default_center_dist_scale")]
    pub center_dist_scale: f64,
    /// IoU alternative to the distance criterion for contact
    #[serde(default = "default_contact_iou_min")]
    pub iou_min: f64,
}

fn default_center_dist_scale() -> f64 {
    0.35
}
fn default_contact_iou_min() -> f64 {
    0.03
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            center_dist_scale: default_center_dist_scale(),
            iou_min: default_contact_iou_min(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoiseFilteringConfig {
    /// Consecutive frames required before acting on a predicate
    #[serde(default = "default_min_consensus")]
    pub min_consensus: u32,
    /// Moving-window size for position smoothing
    #[serde(default = "default_jitter_window")]
    pub jitter_window: usize,
    /// Detections shorter than this many pixels are dropped
    #[serde(default = "default_min_box_height_px")]
    pub min_box_height_px: u32,
    /// Detector class ids accepted as persons
    #[serde(default = "default_person_classes")]
    pub person_classes: Vec<u32>,
}

fn default_min_consensus() -> u32 {
    3
}
fn default_jitter_window() -> usize {
    5
}
fn default_min_box_height_px() -> u32 {
    40
}
fn default_person_classes() -> Vec<u32> {
    vec![0]
}

impl Default for NoiseFilteringConfig {
    fn default() -> Self {
        Self {
            min_consensus: default_min_consensus(),
            jitter_window: default_jitter_window(),
            min_box_height_px: default_min_box_height_px(),
            person_classes: default_person_classes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Person state resets after this long without updates (seconds)
    #[serde(default = "default_session_timeout")]
    pub session_timeout: f64,
    /// Re-examination lockout after a completed check (seconds)
    #[serde(default = "default_check_completed_cooldown")]
    pub check_completed_cooldown: f64,
}

fn default_session_timeout() -> f64 {
    8.0
}
fn default_check_completed_cooldown() -> f64 {
    10.0
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: default_session_timeout(),
            check_completed_cooldown: default_check_completed_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesConfig {
    /// Gate-area polygon, normalized `[x, y]` vertices
    #[serde(default = "default_gate_area")]
    pub gate_area: Vec<[f64; 2]>,
    /// Guard-anchor polygon, normalized `[x, y]` vertices
    #[serde(default = "default_guard_anchor")]
    pub guard_anchor: Vec<[f64; 2]>,
}

fn default_gate_area() -> Vec<[f64; 2]> {
    vec![[0.3, 0.2], [0.7, 0.2], [0.7, 0.8], [0.3, 0.8]]
}

fn default_guard_anchor() -> Vec<[f64; 2]> {
    vec![[0.1, 0.15], [0.25, 0.15], [0.25, 0.85], [0.1, 0.85]]
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self { gate_area: default_gate_area(), guard_anchor: default_guard_anchor() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExaminationConfig {
    #[serde(default = "default_examination_mode")]
    pub mode: ExaminationMode,
}

fn default_examination_mode() -> ExaminationMode {
    ExaminationMode::Sequential
}

impl Default for ExaminationConfig {
    fn default() -> Self {
        Self { mode: default_examination_mode() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventLogConfig {
    /// Ring-buffer capacity for retained events
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

fn default_event_capacity() -> usize {
    2000
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self { capacity: default_event_capacity() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for snapshot egress (JSONL format)
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    /// File path for event egress (JSONL format)
    #[serde(default = "default_events_file")]
    pub events_file: String,
}

fn default_snapshot_file() -> String {
    "snapshots.jsonl".to_string()
}
fn default_events_file() -> String {
    "events.jsonl".to_string()
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { snapshot_file: default_snapshot_file(), events_file: default_events_file() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Stream/site identifier (e.g. "gate-01")
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "gatewatch".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub score: ScoreConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub noise_filtering: NoiseFilteringConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub examination: ExaminationConfig,
    #[serde(default)]
    pub event_log: EventLogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(skip)]
    config_file: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Load configuration with fallback chain: explicit path, CONFIG_FILE
    /// env var, config/dev.toml, built-in defaults.
    pub fn load_from_path(path: &str) -> Self {
        let candidates = [
            path.to_string(),
            env::var("CONFIG_FILE").unwrap_or_default(),
            "config/dev.toml".to_string(),
        ];

        for candidate in candidates.iter().filter(|c| !c.is_empty()) {
            match Self::from_file(candidate) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %candidate, error = %e, "config_load_failed");
                }
            }
        }

        tracing::warn!("config_using_defaults");
        Self::default()
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn gate_area_polygon(&self) -> Vec<Point> {
        self.zones.gate_area.iter().map(|[x, y]| Point::new(*x, *y)).collect()
    }

    pub fn guard_anchor_polygon(&self) -> Vec<Point> {
        self.zones.guard_anchor.iter().map(|[x, y]| Point::new(*x, *y)).collect()
    }
}

/// Validate a polygon delivered via config or control command.
///
/// Requirements: at least 3 vertices, all coordinates finite and within
/// `[0, 1]`. Returns a human-readable reason on rejection.
pub fn validate_polygon(poly: &[Point]) -> Result<(), String> {
    if poly.len() < 3 {
        return Err(format!("polygon has {} vertices, need at least 3", poly.len()));
    }
    for (i, p) in poly.iter().enumerate() {
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(format!("vertex {} is not finite", i));
        }
        if !(0.0..=1.0).contains(&p.x) || !(0.0..=1.0).contains(&p.y) {
            return Err(format!("vertex {} out of normalized range: ({}, {})", i, p.x, p.y));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = Config::default();

        assert_eq!(config.group.t_group, 2.0);
        assert_eq!(config.group.d_max, 0.15);
        assert_eq!(config.group.t_lock, 1.0);
        assert_eq!(config.group.t_break, 2.0);
        assert_eq!(config.group.iou_min, 0.02);

        assert_eq!(config.presence.presence_to_check, 6.0);
        assert_eq!(config.presence.proximity_min, 2.0);
        assert_eq!(config.presence.check_min_individual, 3.0);
        assert_eq!(config.presence.check_min_batch, 4.0);
        assert_eq!(config.presence.interaction_min, 1.2);

        assert_eq!(config.guard.guard_ready, 3.0);
        assert_eq!(config.guard.t_vacate, 2.0);
        assert_eq!(config.guard.anchor_logic, AnchorLogic::Either);

        assert_eq!(config.queue.t_warn, 30.0);
        assert_eq!(config.queue.t_max_wait, 45.0);

        assert_eq!(config.tracking.high_conf, 0.5);
        assert_eq!(config.tracking.low_conf, 0.2);
        assert_eq!(config.tracking.iou_threshold, 0.3);
        assert_eq!(config.tracking.min_hits, 3);
        assert_eq!(config.tracking.max_age, 30);

        assert_eq!(config.score.base, 0.6);
        assert_eq!(config.score.threshold, 0.9);

        assert_eq!(config.noise_filtering.min_consensus, 3);
        assert_eq!(config.noise_filtering.jitter_window, 5);

        assert_eq!(config.session.session_timeout, 8.0);
        assert_eq!(config.session.check_completed_cooldown, 10.0);

        assert_eq!(config.examination.mode, ExaminationMode::Sequential);
        assert_eq!(config.event_log.capacity, 2000);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
[group]
d_max = 0.2

[guard]
anchor_logic = "strict_anchor"

[examination]
mode = "batch"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.group.d_max, 0.2);
        // Untouched fields keep defaults
        assert_eq!(config.group.t_group, 2.0);
        assert_eq!(config.guard.anchor_logic, AnchorLogic::StrictAnchor);
        assert_eq!(config.examination.mode, ExaminationMode::Batch);
    }

    #[test]
    fn test_default_zones_are_valid() {
        let config = Config::default();
        assert!(validate_polygon(&config.gate_area_polygon()).is_ok());
        assert!(validate_polygon(&config.guard_anchor_polygon()).is_ok());
    }

    #[test]
    fn test_validate_polygon_rejects_degenerate() {
        let line = vec![Point::new(0.1, 0.1), Point::new(0.5, 0.5)];
        assert!(validate_polygon(&line).is_err());
    }

    #[test]
    fn test_validate_polygon_rejects_out_of_range() {
        let poly = vec![Point::new(0.1, 0.1), Point::new(1.5, 0.2), Point::new(0.3, 0.4)];
        let err = validate_polygon(&poly).unwrap_err();
        assert!(err.contains("out of normalized range"));
    }

    #[test]
    fn test_validate_polygon_rejects_nan() {
        let poly = vec![Point::new(0.1, 0.1), Point::new(f64::NAN, 0.2), Point::new(0.3, 0.4)];
        assert!(validate_polygon(&poly).is_err());
    }
}
