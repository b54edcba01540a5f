//! Coordinate descent over segmentation lengths.
//!
//! Lines tagged with a negative segmentation value form optimizer groups;
//! every line in a group shares one segmentation length. The optimizer
//! searches the lengths that minimize the number of services the pipeline
//! emits, evaluating candidates on the subgraph of lines reachable from the
//! grouped ones.

use super::prune::prune_services;
use super::search::search_services;
use crate::error::ConvertError;
use crate::geometry::GeoMap;
use crate::rc::RcMap;
use ahash::AHashSet;
use log::{debug, info};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the optimizer has anything to do: it must be enabled and at
/// least one line must carry a group key instead of an explicit length.
pub fn wants_optimization(geomap: &GeoMap) -> bool {
    geomap.config.optimize_segmentation
        && geomap.config.segmented_lines.values().any(|&v| v < 0)
}

/// One full masked pipeline run, reduced to its objective value.
fn masked_service_count(
    geomap: &GeoMap,
    mask: &AHashSet<i64>,
    cancel: Option<&AtomicBool>,
) -> Result<usize, ConvertError> {
    let mut rcmap = RcMap::default();
    search_services(geomap, &mut rcmap, Some(mask), cancel)?;
    prune_services(&mut rcmap);
    Ok(rcmap.services.len())
}

/// Lines reachable from the seed set by repeatedly crossing friend and
/// merged pairs. Routes can only leave the segmented lines through these,
/// so nothing outside the closure affects the objective.
fn expand_mask(geomap: &GeoMap, seeds: impl Iterator<Item = i64>) -> AHashSet<i64> {
    let mut mask: AHashSet<i64> = seeds.collect();
    let mut queue: VecDeque<i64> = mask.iter().copied().collect();
    while let Some(line_id) = queue.pop_front() {
        for &(a, b) in geomap
            .config
            .friend_lines
            .iter()
            .chain(geomap.config.merged_lines.iter())
        {
            if a == line_id && mask.insert(b) {
                queue.push_back(b);
            }
        }
    }
    mask
}

/// Replace the group keys in `segmented_lines` with tuned lengths. The map
/// is left ready for the caller's final full-line run.
pub fn tune_segmentation(
    geomap: &mut GeoMap,
    cancel: Option<&AtomicBool>,
) -> Result<(), ConvertError> {
    let mut groups: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for (&line_id, &value) in &geomap.config.segmented_lines {
        if value < 0 {
            groups.entry(value).or_default().push(line_id);
        }
    }
    if groups.is_empty() {
        return Ok(());
    }

    let start_length = 2 * geomap.config.max_rc_steps;
    let mut lengths: BTreeMap<i64, i64> = groups.keys().map(|&k| (k, start_length)).collect();
    for line_ids in groups.values() {
        for id in line_ids {
            geomap.config.segmented_lines.insert(*id, start_length);
        }
    }

    let mask = expand_mask(geomap, groups.values().flatten().copied());
    let mut baseline = masked_service_count(geomap, &mask, cancel)?;
    info!(
        "segmentation optimizer: {} group(s), {} masked line(s), baseline {} service(s)",
        groups.len(),
        mask.len(),
        baseline
    );

    for iteration in 1..=geomap.config.max_iterations {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(ConvertError::Cancelled);
            }
        }
        // Wide probes first, narrow refinement later.
        let deltas: &[i64] = if iteration <= 2 {
            &[-11, -5, -2, 2, 5, 11]
        } else {
            &[-5, -2, 2, 5]
        };

        let mut improved = false;
        let keys: Vec<i64> = groups.keys().copied().collect();
        for key in keys {
            let current = lengths[&key];
            let mut best: Option<(usize, i64)> = None;
            for &delta in deltas {
                let candidate = current + delta;
                if candidate <= geomap.config.max_rc_steps
                    || candidate >= 2 * geomap.config.max_length
                {
                    continue;
                }
                for id in &groups[&key] {
                    geomap.config.segmented_lines.insert(*id, candidate);
                }
                let count = masked_service_count(geomap, &mask, cancel)?;
                if count < baseline && best.map_or(true, |(best_count, _)| count < best_count) {
                    best = Some((count, candidate));
                }
            }
            match best {
                Some((count, candidate)) => {
                    debug!(
                        "group {key}: length {current} -> {candidate}, {baseline} -> {count} service(s)"
                    );
                    lengths.insert(key, candidate);
                    for id in &groups[&key] {
                        geomap.config.segmented_lines.insert(*id, candidate);
                    }
                    baseline = count;
                    improved = true;
                }
                None => {
                    for id in &groups[&key] {
                        geomap.config.segmented_lines.insert(*id, current);
                    }
                }
            }
        }
        if !improved {
            break;
        }
    }

    info!("segmentation optimizer: final lengths {lengths:?}");
    Ok(())
}
