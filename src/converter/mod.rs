//! Conversion of a geometric transit diagram into the board-game map: the
//! stations are materialized from groups and loners, and the services are
//! enumerated by a breadth-first search over directed tracks.

mod optimizer;
mod prune;
mod search;
mod track;


use crate::error::ConvertError;
use crate::geometry::{GeoMap, PointKind};
use crate::rc::{RcMap, RcStation};
use log::info;
use std::sync::atomic::AtomicBool;

/// Emit one RC station per station group and one per ungrouped station
/// point, with canvas-normalized coordinates.
fn add_stations(geomap: &GeoMap, rcmap: &mut RcMap) {
    for (&group_id, _) in &geomap.station_groups {
        let pos = geomap.normalized_pos(geomap.group_pos(group_id));
        rcmap.stations.insert(
            group_id,
            RcStation {
                id: group_id,
                norm_x: pos.x,
                norm_y: pos.y,
            },
        );
    }
    for point in geomap.points.values() {
        if point.kind != PointKind::Station {
            continue;
        }
        if geomap.point_to_group.contains_key(&point.id) {
            continue;
        }
        let pos = geomap.normalized_pos(point.pos);
        rcmap.stations.insert(
            point.id,
            RcStation {
                id: point.id,
                norm_x: pos.x,
                norm_y: pos.y,
            },
        );
    }
}

/// Convert a geometric map into its RC map. Pure and synchronous; with no
/// cancellation flag it always runs to completion.
pub fn convert_to_rc(geomap: &GeoMap) -> RcMap {
    convert_to_rc_cancellable(geomap, None).expect("conversion without a cancel flag cannot fail")
}

/// Convert with a cooperative cancellation flag, polled between search
/// steps and between optimizer evaluations.
pub fn convert_to_rc_cancellable(
    geomap: &GeoMap,
    cancel: Option<&AtomicBool>,
) -> Result<RcMap, ConvertError> {
    let mut tuned;
    let geomap = if optimizer::wants_optimization(geomap) {
        tuned = geomap.clone();
        optimizer::tune_segmentation(&mut tuned, cancel)?;
        &tuned
    } else if geomap.config.segmented_lines.values().any(|&v| v < 0) {
        // Group keys without the optimizer would act as instantly exhausted
        // budgets; fall back to the optimizer's starting length.
        tuned = geomap.clone();
        let fallback = 2 * geomap.config.max_rc_steps;
        for value in tuned.config.segmented_lines.values_mut() {
            if *value < 0 {
                *value = fallback;
            }
        }
        &tuned
    } else {
        geomap
    };

    let mut rcmap = RcMap::default();
    add_stations(geomap, &mut rcmap);
    search::search_services(geomap, &mut rcmap, None, cancel)?;
    let found = rcmap.services.len();
    prune::prune_services(&mut rcmap);
    info!(
        "converted {} station(s), {} service(s) ({} before pruning)",
        rcmap.stations.len(),
        rcmap.services.len(),
        found
    );
    Ok(rcmap)
}
