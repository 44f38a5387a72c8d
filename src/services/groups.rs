//! Spatio-temporal group detection
//!
//! Visitors arriving together and standing together are examined together.
//! A group forms from persons in the gate area that are pairwise close
//! (distance or IoU) and arrived within `t_group` of each other; it
//! becomes stable once it has lived for `t_lock`, and splits after its
//! members stay spread beyond `1.5 * d_max` for `t_break`.

use crate::domain::geometry::{euclidean, iou, BBox, Point};
use crate::domain::types::{GroupId, MonoTs, TrackId};
use crate::infra::config::GroupConfig;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, info};

/// What the pipeline needs to know about one person for grouping
#[derive(Debug, Clone, Copy)]
pub struct PersonObs {
    pub track_id: TrackId,
    pub center: Point,
    pub bbox: BBox,
    pub first_seen: MonoTs,
    pub in_gate_area: bool,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub group_id: GroupId,
    pub members: SmallVec<[TrackId; 4]>,
    pub formed_at: MonoTs,
    pub last_updated: MonoTs,
    pub centroid: Point,
    /// Set while pairwise spread exceeds the break distance
    separated_since: Option<MonoTs>,
}

impl Group {
    pub fn is_stable(&self, now: MonoTs, t_lock: f64) -> bool {
        now.since(self.formed_at) >= t_lock
    }

    /// Members currently spread beyond the break distance; the group is
    /// on its way to a split unless they regroup
    pub fn is_separated(&self) -> bool {
        self.separated_since.is_some()
    }
}

/// Outcome of one frame of group maintenance
#[derive(Debug, Default)]
pub struct GroupFrameResult {
    /// Newly materialized groups
    pub formed: Vec<GroupId>,
    /// Groups removed because their members separated; ticket fan-out
    /// applies to these
    pub split: Vec<Group>,
    /// Groups removed because no member track remains; no side effects
    pub dissolved: Vec<Group>,
}

pub struct GroupDetector {
    config: GroupConfig,
    groups: FxHashMap<GroupId, Group>,
    next_id: u64,
}

impl GroupDetector {
    pub fn new(config: GroupConfig) -> Self {
        Self { config, groups: FxHashMap::default(), next_id: 1 }
    }

    /// Run one frame: refresh existing groups, detect splits, form new
    /// groups from ungrouped persons in the gate area.
    pub fn update(&mut self, persons: &[PersonObs], now: MonoTs) -> GroupFrameResult {
        let mut result = GroupFrameResult::default();

        self.refresh_existing(persons, now, &mut result);
        self.form_new(persons, now, &mut result);

        result
    }

    fn refresh_existing(
        &mut self,
        persons: &[PersonObs],
        now: MonoTs,
        result: &mut GroupFrameResult,
    ) {
        let by_id: FxHashMap<TrackId, &PersonObs> =
            persons.iter().map(|p| (p.track_id, p)).collect();

        let mut group_ids: Vec<GroupId> = self.groups.keys().copied().collect();
        group_ids.sort();

        for group_id in group_ids {
            let Some(group) = self.groups.get_mut(&group_id) else { continue };

            let active: SmallVec<[TrackId; 4]> =
                group.members.iter().copied().filter(|id| by_id.contains_key(id)).collect();

            // A group needs two live members to stay a group
            if active.len() < 2 {
                if let Some(group) = self.groups.remove(&group_id) {
                    debug!(group_id = %group_id, remaining = %active.len(), "group_dissolved");
                    result.dissolved.push(group);
                }
                continue;
            }

            if active.len() < group.members.len() {
                group.members = active.clone();
                group.last_updated = now;
            }

            // Centroid follows the active members
            let n = active.len() as f64;
            let (sx, sy) = active
                .iter()
                .map(|id| by_id[id].center)
                .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
            group.centroid = Point::new(sx / n, sy / n);

            // Split detection on sustained separation
            let mut max_spread: f64 = 0.0;
            for i in 0..active.len() {
                for j in (i + 1)..active.len() {
                    let d = euclidean(by_id[&active[i]].center, by_id[&active[j]].center);
                    max_spread = max_spread.max(d);
                }
            }

            if max_spread > self.config.d_max * 1.5 {
                let since = *group.separated_since.get_or_insert(now);
                if now.since(since) >= self.config.t_break {
                    if let Some(group) = self.groups.remove(&group_id) {
                        info!(
                            group_id = %group_id,
                            members = ?group.members,
                            spread = %format!("{max_spread:.3}"),
                            "group_split"
                        );
                        result.split.push(group);
                    }
                }
            } else {
                group.separated_since = None;
            }
        }
    }

    fn form_new(&mut self, persons: &[PersonObs], now: MonoTs, result: &mut GroupFrameResult) {
        // Candidates: ungrouped persons currently in the gate area,
        // in id order for determinism
        let mut candidates: Vec<&PersonObs> = persons
            .iter()
            .filter(|p| p.in_gate_area && !self.is_member(p.track_id))
            .collect();
        candidates.sort_by_key(|p| p.track_id);

        if candidates.len() < 2 {
            return;
        }

        // First pass, greedy in id order: decide which persons seed a
        // forming group and which get absorbed by an earlier seed.
        let mut claimed = vec![false; candidates.len()];
        let mut seeds: Vec<usize> = Vec::new();
        for i in 0..candidates.len() {
            if claimed[i] {
                continue;
            }
            seeds.push(i);
            for j in (i + 1)..candidates.len() {
                if !claimed[j] && self.pair_qualifies(candidates[i], candidates[j]) {
                    claimed[j] = true;
                }
            }
        }

        // Second pass: each absorbed person joins the qualifying seed
        // whose current centroid is closest; ties go to the lower
        // (earlier-seeded) group.
        struct Forming {
            seed: usize,
            members: Vec<usize>,
            centroid: Point,
        }
        let mut forming: Vec<Forming> = seeds
            .iter()
            .map(|&s| Forming { seed: s, members: vec![s], centroid: candidates[s].center })
            .collect();

        for j in 0..candidates.len() {
            if seeds.contains(&j) || !claimed[j] {
                continue;
            }
            let person = candidates[j];

            let mut best: Option<(usize, f64)> = None;
            for (g_idx, group) in forming.iter().enumerate() {
                if !self.pair_qualifies(candidates[group.seed], person) {
                    continue;
                }
                let d = euclidean(person.center, group.centroid);
                match best {
                    None => best = Some((g_idx, d)),
                    Some((_, best_d)) if d < best_d => best = Some((g_idx, d)),
                    _ => {}
                }
            }

            if let Some((g_idx, _)) = best {
                let group = &mut forming[g_idx];
                let n = group.members.len() as f64;
                group.centroid = Point::new(
                    (group.centroid.x * n + person.center.x) / (n + 1.0),
                    (group.centroid.y * n + person.center.y) / (n + 1.0),
                );
                group.members.push(j);
            }
        }

        // Materialize forming groups with at least two members
        for group in forming.into_iter().filter(|g| g.members.len() >= 2) {
            let group_id = GroupId(self.next_id);
            self.next_id += 1;

            let mut members: SmallVec<[TrackId; 4]> =
                group.members.iter().map(|&i| candidates[i].track_id).collect();
            members.sort();

            info!(group_id = %group_id, members = ?members, "group_formed");
            self.groups.insert(
                group_id,
                Group {
                    group_id,
                    members,
                    formed_at: now,
                    last_updated: now,
                    centroid: group.centroid,
                    separated_since: None,
                },
            );
            result.formed.push(group_id);
        }
    }

    fn pair_qualifies(&self, a: &PersonObs, b: &PersonObs) -> bool {
        let spatial = euclidean(a.center, b.center) <= self.config.d_max
            || iou(&a.bbox, &b.bbox) >= self.config.iou_min;
        let temporal = (a.first_seen.0 - b.first_seen.0).abs() <= self.config.t_group;
        spatial && temporal
    }

    pub fn is_member(&self, track_id: TrackId) -> bool {
        self.groups.values().any(|g| g.members.contains(&track_id))
    }

    /// Track ids of members of stable groups
    pub fn stable_member_ids(&self, now: MonoTs) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self
            .groups
            .values()
            .filter(|g| g.is_stable(now, self.config.t_lock))
            .flat_map(|g| g.members.iter().copied())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    /// All groups sorted by id, for deterministic iteration
    pub fn groups_sorted(&self) -> Vec<&Group> {
        let mut groups: Vec<&Group> = self.groups.values().collect();
        groups.sort_by_key(|g| g.group_id);
        groups
    }

    pub fn t_lock(&self) -> f64 {
        self.config.t_lock
    }

    pub fn set_config(&mut self, config: GroupConfig) {
        self.config = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: u64, x: f64, y: f64, first_seen: f64) -> PersonObs {
        PersonObs {
            track_id: TrackId(id),
            center: Point::new(x, y),
            bbox: BBox::new(x - 0.04, y - 0.15, x + 0.04, y + 0.15),
            first_seen: MonoTs(first_seen),
            in_gate_area: true,
        }
    }

    fn detector() -> GroupDetector {
        GroupDetector::new(GroupConfig::default())
    }

    #[test]
    fn test_two_close_persons_form_group() {
        let mut detector = detector();

        let result = detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.58, 0.5, 0.4)], MonoTs(1.0));

        assert_eq!(result.formed.len(), 1);
        let group = detector.get(result.formed[0]).unwrap();
        assert_eq!(group.members.as_slice(), &[TrackId(1), TrackId(2)]);
    }

    #[test]
    fn test_distant_persons_do_not_group() {
        let mut detector = detector();
        let result = detector.update(&[obs(1, 0.35, 0.5, 0.0), obs(2, 0.65, 0.5, 0.4)], MonoTs(1.0));
        assert!(result.formed.is_empty());
    }

    #[test]
    fn test_late_arrival_does_not_join() {
        let mut detector = detector();
        // Same spot, but arrived 5 seconds apart (> t_group = 2.0)
        let result = detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.55, 0.5, 5.0)], MonoTs(6.0));
        assert!(result.formed.is_empty());
    }

    #[test]
    fn test_outside_gate_area_excluded() {
        let mut detector = detector();
        let mut p2 = obs(2, 0.55, 0.5, 0.2);
        p2.in_gate_area = false;
        let result = detector.update(&[obs(1, 0.50, 0.5, 0.0), p2], MonoTs(1.0));
        assert!(result.formed.is_empty());
    }

    #[test]
    fn test_stability_requires_t_lock() {
        let mut detector = detector();

        let persons = [obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.3)];
        let result = detector.update(&persons, MonoTs(1.0));
        let group_id = result.formed[0];

        assert!(!detector.get(group_id).unwrap().is_stable(MonoTs(1.5), 1.0));
        assert!(detector.get(group_id).unwrap().is_stable(MonoTs(2.0), 1.0));
        assert_eq!(detector.stable_member_ids(MonoTs(2.0)), vec![TrackId(1), TrackId(2)]);
    }

    #[test]
    fn test_split_after_sustained_separation() {
        let mut detector = detector();

        detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.2)], MonoTs(1.0));

        // Members drift apart beyond 1.5 * d_max = 0.225
        let mut split = Vec::new();
        for i in 0..80 {
            let now = MonoTs(1.0 + 0.033 * (i + 1) as f64);
            let result = detector.update(&[obs(1, 0.40, 0.5, 0.0), obs(2, 0.70, 0.5, 0.2)], now);
            if !result.split.is_empty() {
                split = result.split;
                break;
            }
        }

        assert_eq!(split.len(), 1);
        assert_eq!(split[0].members.as_slice(), &[TrackId(1), TrackId(2)]);
        assert!(!detector.is_member(TrackId(1)));
    }

    #[test]
    fn test_brief_separation_does_not_split() {
        let mut detector = detector();
        detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.2)], MonoTs(1.0));

        // One second apart (under t_break = 2.0), then back together
        for i in 0..30 {
            let now = MonoTs(1.0 + 0.033 * (i + 1) as f64);
            let result = detector.update(&[obs(1, 0.40, 0.5, 0.0), obs(2, 0.70, 0.5, 0.2)], now);
            assert!(result.split.is_empty());
        }
        let result =
            detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.2)], MonoTs(2.1));
        assert!(result.split.is_empty());

        // Separation timer was cleared; another short separation is fine
        let result =
            detector.update(&[obs(1, 0.40, 0.5, 0.0), obs(2, 0.70, 0.5, 0.2)], MonoTs(2.2));
        assert!(result.split.is_empty());
        assert!(detector.is_member(TrackId(1)));
    }

    #[test]
    fn test_group_dissolves_when_tracks_vanish() {
        let mut detector = detector();
        detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.2)], MonoTs(1.0));

        let result = detector.update(&[], MonoTs(1.1));
        assert_eq!(result.dissolved.len(), 1);
        assert!(result.split.is_empty());
    }

    #[test]
    fn test_group_dissolves_below_two_members() {
        let mut detector = detector();
        detector.update(&[obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.2)], MonoTs(1.0));

        // One member's track is gone; a one-person group is no group
        let result = detector.update(&[obs(1, 0.50, 0.5, 0.0)], MonoTs(1.1));
        assert_eq!(result.dissolved.len(), 1);
        assert!(result.split.is_empty());
        assert!(!detector.is_member(TrackId(1)));
    }

    #[test]
    fn test_three_person_group() {
        let mut detector = detector();
        let result = detector.update(
            &[obs(1, 0.50, 0.5, 0.0), obs(2, 0.58, 0.5, 0.3), obs(3, 0.54, 0.58, 0.5)],
            MonoTs(1.0),
        );
        assert_eq!(result.formed.len(), 1);
        let group = detector.get(result.formed[0]).unwrap();
        assert_eq!(group.members.len(), 3);
    }

    #[test]
    fn test_joiner_picks_closer_forming_group() {
        let mut detector = detector();

        // Two well-separated seeds, each with a nearby companion; the
        // middle person qualifies for seed 1 only
        let result = detector.update(
            &[
                obs(1, 0.30, 0.5, 0.0),
                obs(2, 0.42, 0.5, 0.1),
                obs(3, 0.70, 0.5, 0.2),
                obs(4, 0.78, 0.5, 0.3),
            ],
            MonoTs(1.0),
        );

        assert_eq!(result.formed.len(), 2);
        let g1 = detector.get(result.formed[0]).unwrap();
        let g2 = detector.get(result.formed[1]).unwrap();
        assert_eq!(g1.members.as_slice(), &[TrackId(1), TrackId(2)]);
        assert_eq!(g2.members.as_slice(), &[TrackId(3), TrackId(4)]);
    }

    #[test]
    fn test_member_not_regrouped() {
        let mut detector = detector();
        let persons = [obs(1, 0.50, 0.5, 0.0), obs(2, 0.56, 0.5, 0.2)];
        let first = detector.update(&persons, MonoTs(1.0));
        assert_eq!(first.formed.len(), 1);

        let second = detector.update(&persons, MonoTs(1.033));
        assert!(second.formed.is_empty());
    }
}
