use convect_providers::{DeviceMappingEntry, MappingDestination, MappingSource};
use serde::{Deserialize, Serialize};

/// The single active boot source of a provisioning intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BootSource {
    Image { image_ref: String },
    VolumeTemplate { volume_ref: String },
    SnapshotTemplate { snapshot_ref: String },
}

/// Resolved boot layout: the image reference to submit (if any), the full
/// ordered device-mapping list, and the volume that still needs a remote
/// mark-bootable call before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BootPlan {
    pub image_ref: Option<String>,
    pub entries: Vec<DeviceMappingEntry>,
    pub mark_bootable: Option<String>,
}

/// Decide which device boots the instance. Pure; the one remote side effect
/// (marking a promoted volume bootable) is returned as `mark_bootable` for
/// the caller to perform.
///
/// Precedence: a volume or snapshot template boots from its own backing id;
/// an image template boots from the first `bootable` candidate, else from a
/// sole `selected` candidate (promoted), else from the image itself.
pub fn plan_boot(source: &BootSource, candidates: &[DeviceMappingEntry]) -> BootPlan {
    match source {
        BootSource::VolumeTemplate { volume_ref } => {
            template_plan(volume_ref, MappingSource::Volume, candidates)
        }
        BootSource::SnapshotTemplate { snapshot_ref } => {
            template_plan(snapshot_ref, MappingSource::Snapshot, candidates)
        }
        BootSource::Image { image_ref } => {
            let winner = candidates
                .iter()
                .position(|e| e.bootable)
                .map(|index| (index, false))
                .or_else(|| sole_selected(candidates).map(|index| (index, true)));

            match winner {
                Some((index, needs_mark)) => {
                    let mut entries = data_entries(candidates);
                    // Size stays on the entry as request metadata; the wire
                    // projection drops it for every volume-sourced device.
                    {
                        let boot = &mut entries[index];
                        boot.source_type = MappingSource::Volume;
                        boot.destination_type = MappingDestination::Volume;
                        boot.boot_index = Some(0);
                        boot.bootable = true;
                    }
                    let mark_bootable = needs_mark.then(|| entries[index].uuid.clone());
                    BootPlan {
                        image_ref: None,
                        entries,
                        mark_bootable,
                    }
                }
                None => BootPlan {
                    image_ref: Some(image_ref.clone()),
                    entries: data_entries(candidates),
                    mark_bootable: None,
                },
            }
        }
    }
}

fn template_plan(
    backing_ref: &str,
    source_type: MappingSource,
    candidates: &[DeviceMappingEntry],
) -> BootPlan {
    let boot = DeviceMappingEntry {
        uuid: backing_ref.to_string(),
        source_type,
        destination_type: MappingDestination::Volume,
        boot_index: Some(0),
        size_gb: None,
        delete_on_termination: true,
        selected: false,
        bootable: true,
        name: None,
        owner_id: None,
    };
    let mut entries = Vec::with_capacity(candidates.len() + 1);
    entries.push(boot);
    entries.extend(data_entries(candidates));
    BootPlan {
        image_ref: None,
        entries,
        mark_bootable: None,
    }
}

fn sole_selected(candidates: &[DeviceMappingEntry]) -> Option<usize> {
    let mut selected = candidates
        .iter()
        .enumerate()
        .filter(|(_, e)| e.selected)
        .map(|(index, _)| index);
    match (selected.next(), selected.next()) {
        (Some(index), None) => Some(index),
        _ => None,
    }
}

// Candidates come in as data devices; any stray boot_index is dropped so
// the plan carries at most one boot entry.
fn data_entries(candidates: &[DeviceMappingEntry]) -> Vec<DeviceMappingEntry> {
    candidates
        .iter()
        .cloned()
        .map(|mut entry| {
            entry.boot_index = None;
            entry
        })
        .collect()
}
