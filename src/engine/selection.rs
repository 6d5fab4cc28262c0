use crate::model::*;

/// Smallest table that still seats the party. Equal capacities keep the
/// earlier candidate, so catalog order breaks ties.
pub fn best_fit(free: &[Resource], size: u32) -> Option<&Resource> {
    free.iter()
        .filter(|r| r.fits(size))
        .min_by_key(|r| r.capacity)
}

/// Any slot is valid and parties larger than every table fall through to
/// `NoCapacity`, so only an empty party is turned away here.
pub(crate) fn validate_request(request: &AllocationRequest) -> Result<(), AllocationFailure> {
    if request.size == 0 {
        return Err(AllocationFailure::Rejected("party size must be positive"));
    }
    Ok(())
}
