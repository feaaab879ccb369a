use crate::allocation::requests::AllocationRequest;
use crate::allocation::rules::AllocationRule;
use crate::inventory::BedPlacement;

/// Whether a free bed may go to this request under this rule.
pub fn fits(placement: &BedPlacement, rule: &AllocationRule, request: &AllocationRequest) -> bool {
    let target = &rule.target;
    let hostel_ok = target.hostel_ids.is_empty() || target.hostel_ids.contains(&placement.hostel.id);
    let room_type_ok =
        target.room_types.is_empty() || target.room_types.contains(&placement.room.room_type);
    let policy = placement.room.gender_policy;

    hostel_ok
        && room_type_ok
        && policy.compatible_with(target.gender_policy)
        && policy.admits(request.profile.gender)
        && target.gender_policy.admits(request.profile.gender)
}

/// Candidate beds for a request, preferred hostels and room types first. The
/// input order is kept among equally preferred beds.
pub fn rank_candidates(
    placements: &[BedPlacement],
    rule: &AllocationRule,
    request: &AllocationRequest,
) -> Vec<BedPlacement> {
    let preferences = &request.preferences;
    let mut candidates: Vec<BedPlacement> = placements
        .iter()
        .filter(|placement| fits(placement, rule, request))
        .cloned()
        .collect();
    candidates.sort_by_key(|placement| {
        (
            !preferences.hostel_ids.contains(&placement.hostel.id),
            !preferences.room_types.contains(&placement.room.room_type),
        )
    });
    candidates
}
