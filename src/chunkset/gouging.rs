//! Price-gouging admission control for has-sector queries.

use thiserror::Error;

use crate::config::Allowance;
use crate::worker::{Currency, PriceTable};

/// Fraction of the allowance that the projected has-sector spend may
/// consume before a host is flagged. A denominator of 25 flags a host once
/// its queries would eat 4% of the allowance.
pub const GOUGING_FRACTION_DENOM: u128 = 25;

/// Typical volume of download traffic served per chunk project; used to
/// project how many has-sector rounds an allowance period will need.
pub const STREAM_DOWNLOAD_SIZE: u64 = 1 << 16;

// One has-sector exchange fits a single frame each way.
const HAS_SECTOR_UPLOAD_BANDWIDTH: u64 = 1460;
const HAS_SECTOR_DOWNLOAD_BANDWIDTH: u64 = 1460;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GougingError {
    #[error("download bandwidth price {price} exceeds the allowance cap {cap}")]
    DownloadBandwidthPrice { price: Currency, cap: Currency },
    #[error("upload bandwidth price {price} exceeds the allowance cap {cap}")]
    UploadBandwidthPrice { price: Currency, cap: Currency },
    #[error(
        "projected has-sector spend {projected} exceeds {budget} \
         (1/{GOUGING_FRACTION_DENOM} of the allowance)"
    )]
    ProjectedSpend { projected: u128, budget: u128 },
}

/// Decide whether querying a host for piece availability is economically
/// acceptable under the given allowance.
///
/// With `allowance.funds == 0` the cost-based check is skipped: there is no
/// baseline for deciding what counts as gouging. The bandwidth caps still
/// apply.
pub fn check_gouging(
    pt: &PriceTable,
    allowance: &Allowance,
    num_workers: usize,
    num_roots: usize,
) -> Result<(), GougingError> {
    if allowance.max_download_bandwidth_price != 0
        && pt.download_bandwidth_cost > allowance.max_download_bandwidth_price
    {
        return Err(GougingError::DownloadBandwidthPrice {
            price: pt.download_bandwidth_cost,
            cap: allowance.max_download_bandwidth_price,
        });
    }
    if allowance.max_upload_bandwidth_price != 0
        && pt.upload_bandwidth_cost > allowance.max_upload_bandwidth_price
    {
        return Err(GougingError::UploadBandwidthPrice {
            price: pt.upload_bandwidth_cost,
            cap: allowance.max_upload_bandwidth_price,
        });
    }
    if allowance.funds == 0 {
        return Ok(());
    }

    // Project how many has-sector queries the allowance period will pay
    // for if every download round asks every worker once.
    let required_projects = allowance.expected_download / STREAM_DOWNLOAD_SIZE;
    let required_queries = u128::from(required_projects).saturating_mul(num_workers as u128);
    let projected = has_sector_job_cost(pt, num_roots).saturating_mul(required_queries);

    let budget = u128::from(allowance.funds) / GOUGING_FRACTION_DENOM;
    if projected > budget {
        return Err(GougingError::ProjectedSpend { projected, budget });
    }
    Ok(())
}

/// Cost of one has-sector job probing `num_roots` roots. Saturates instead
/// of wrapping; a saturated cost always trips the check.
fn has_sector_job_cost(pt: &PriceTable, num_roots: usize) -> u128 {
    let program = u128::from(pt.init_base_cost)
        .saturating_add(u128::from(pt.has_sector_base_cost).saturating_mul(num_roots as u128));
    let bandwidth = u128::from(HAS_SECTOR_UPLOAD_BANDWIDTH)
        .saturating_mul(u128::from(pt.upload_bandwidth_cost))
        .saturating_add(
            u128::from(HAS_SECTOR_DOWNLOAD_BANDWIDTH)
                .saturating_mul(u128::from(pt.download_bandwidth_cost)),
        );
    program.saturating_add(bandwidth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fair_allowance() -> Allowance {
        Allowance {
            funds: 1_000_000_000,
            max_download_bandwidth_price: 100,
            max_upload_bandwidth_price: 100,
            expected_download: 1 << 24,
        }
    }

    #[test]
    fn cheap_host_is_admitted() {
        let pt = PriceTable {
            init_base_cost: 1,
            has_sector_base_cost: 1,
            download_bandwidth_cost: 1,
            upload_bandwidth_cost: 1,
        };
        check_gouging(&pt, &fair_allowance(), 10, 10).unwrap();
    }

    #[test]
    fn download_price_above_cap_is_rejected() {
        let pt = PriceTable {
            download_bandwidth_cost: 101,
            ..PriceTable::default()
        };
        let err = check_gouging(&pt, &fair_allowance(), 10, 10).unwrap_err();
        assert_eq!(
            err,
            GougingError::DownloadBandwidthPrice {
                price: 101,
                cap: 100
            }
        );
    }

    #[test]
    fn upload_price_above_cap_is_rejected() {
        let pt = PriceTable {
            upload_bandwidth_cost: 200,
            ..PriceTable::default()
        };
        let err = check_gouging(&pt, &fair_allowance(), 10, 10).unwrap_err();
        assert_eq!(
            err,
            GougingError::UploadBandwidthPrice {
                price: 200,
                cap: 100
            }
        );
    }

    #[test]
    fn zero_cap_means_uncapped() {
        let pt = PriceTable {
            download_bandwidth_cost: 10,
            upload_bandwidth_cost: 10,
            ..PriceTable::default()
        };
        let allowance = Allowance {
            max_download_bandwidth_price: 0,
            max_upload_bandwidth_price: 0,
            ..fair_allowance()
        };
        check_gouging(&pt, &allowance, 10, 10).unwrap();
    }

    #[test]
    fn zero_funds_skips_the_cost_check() {
        let pt = PriceTable {
            init_base_cost: Currency::MAX,
            has_sector_base_cost: Currency::MAX,
            ..PriceTable::default()
        };
        let allowance = Allowance {
            funds: 0,
            ..fair_allowance()
        };
        check_gouging(&pt, &allowance, 1000, 1000).unwrap();
    }

    #[test]
    fn projected_spend_above_the_budget_is_rejected() {
        let pt = PriceTable {
            has_sector_base_cost: 1_000_000,
            ..PriceTable::default()
        };
        let err = check_gouging(&pt, &fair_allowance(), 100, 10).unwrap_err();
        assert!(matches!(err, GougingError::ProjectedSpend { .. }));
    }

    #[test]
    fn saturated_cost_always_trips_the_check() {
        let pt = PriceTable {
            init_base_cost: Currency::MAX,
            has_sector_base_cost: Currency::MAX,
            download_bandwidth_cost: Currency::MAX,
            upload_bandwidth_cost: Currency::MAX,
        };
        let allowance = Allowance {
            funds: Currency::MAX,
            max_download_bandwidth_price: 0,
            max_upload_bandwidth_price: 0,
            expected_download: u64::MAX,
        };
        let err = check_gouging(&pt, &allowance, usize::MAX, usize::MAX).unwrap_err();
        assert!(matches!(err, GougingError::ProjectedSpend { .. }));
    }

    #[test]
    fn more_workers_raise_the_projection() {
        let pt = PriceTable {
            has_sector_base_cost: 60,
            ..PriceTable::default()
        };
        let allowance = Allowance {
            funds: 100_000,
            max_download_bandwidth_price: 0,
            max_upload_bandwidth_price: 0,
            expected_download: 1 << 17,
        };
        check_gouging(&pt, &allowance, 3, 1).unwrap();
        let err = check_gouging(&pt, &allowance, 50, 1).unwrap_err();
        assert!(matches!(err, GougingError::ProjectedSpend { .. }));
    }
}
