//! File and directory naming contracts shared with the orchestrator, the
//! model and the dissemination steps.

use crate::calendar::parse_ymd;
use crate::error::ConfigurationError;
use chrono::NaiveDate;

/// Name of the leading axis of the aggregated dataset.
pub const ENSEMBLE_DIM: &str = "ensemble";

const OUTPUT_PREFIX: &str = "Qout_";
const MEAN_PREFIX: &str = "nces_avg_";
const NETCDF_EXT: &str = ".nc";

/// Per-member model output: `Qout_<vpu>_<member>.nc`.
pub fn member_output_name(vpu: &str, member: u32) -> String {
    format!("{}{}_{}{}", OUTPUT_PREFIX, vpu, member, NETCDF_EXT)
}

/// Aggregated ensemble artifact: `Qout_<vpu>.nc`.
pub fn aggregate_name(vpu: &str) -> String {
    format!("{}{}{}", OUTPUT_PREFIX, vpu, NETCDF_EXT)
}

/// Ensemble-mean artifact: `nces_avg_<vpu>.nc`.
pub fn mean_name(vpu: &str) -> String {
    format!("{}{}{}", MEAN_PREFIX, vpu, NETCDF_EXT)
}

/// Parse a member index: digits only, compared numerically.
fn parse_index(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Member index of `Qout_<vpu>_<member>.nc`, if `name` is that file for `vpu`.
pub fn parse_member_output(name: &str, vpu: &str) -> Option<u32> {
    let rest = name.strip_prefix(OUTPUT_PREFIX)?.strip_suffix(NETCDF_EXT)?;
    let member = rest.strip_prefix(vpu)?.strip_prefix('_')?;
    parse_index(member)
}

/// Member index of a retrieval input `<member>.<variable>.<ext>`.
pub fn parse_member_input(name: &str, variable: &str) -> Option<u32> {
    let mut parts = name.splitn(3, '.');
    let index = parse_index(parts.next()?)?;
    let var = parts.next()?;
    let ext = parts.next()?;
    (var == variable && !ext.is_empty()).then_some(index)
}

/// `(vpu, member)` of any per-member output name.
pub fn split_member_output(name: &str) -> Option<(&str, u32)> {
    let rest = name.strip_prefix(OUTPUT_PREFIX)?.strip_suffix(NETCDF_EXT)?;
    let (vpu, member) = rest.rsplit_once('_')?;
    if !is_valid_vpu(vpu) {
        return None;
    }
    Some((vpu, parse_index(member)?))
}

/// VPU codes end up in file names and must not collide with the separators.
pub fn is_valid_vpu(vpu: &str) -> bool {
    !vpu.is_empty()
        && vpu
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Date carried by the leading 8 characters of a cycle directory name.
pub fn cycle_dir_date(name: &str) -> Result<NaiveDate, ConfigurationError> {
    let prefix = name.get(..8).ok_or_else(|| ConfigurationError::InvalidDate {
        input: name.to_string(),
    })?;
    parse_ymd(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(member_output_name("718", 12), "Qout_718_12.nc");
        assert_eq!(aggregate_name("718"), "Qout_718.nc");
        assert_eq!(mean_name("718"), "nces_avg_718.nc");
    }

    #[test]
    fn test_parse_member_output() {
        assert_eq!(parse_member_output("Qout_718_12.nc", "718"), Some(12));
        assert_eq!(parse_member_output("Qout_718_0.nc", "718"), Some(0));
        assert_eq!(parse_member_output("Qout_718.nc", "718"), None);
        assert_eq!(parse_member_output("Qout_7181_2.nc", "718"), None);
        assert_eq!(parse_member_output("Qout_718_x.nc", "718"), None);
        assert_eq!(parse_member_output("nces_avg_718.nc", "718"), None);
    }

    #[test]
    fn test_parse_member_input() {
        assert_eq!(parse_member_input("10.runoff.nc", "runoff"), Some(10));
        assert_eq!(parse_member_input("3.runoff.grib", "runoff"), Some(3));
        assert_eq!(parse_member_input("3.temp.nc", "runoff"), None);
        assert_eq!(parse_member_input("a.runoff.nc", "runoff"), None);
        assert_eq!(parse_member_input("3.runoff", "runoff"), None);
    }

    #[test]
    fn test_split_member_output() {
        assert_eq!(split_member_output("Qout_718_12.nc"), Some(("718", 12)));
        assert_eq!(split_member_output("Qout_a-1_3.nc"), Some(("a-1", 3)));
        assert_eq!(split_member_output("Qout_718.nc"), None);
        assert_eq!(split_member_output("Qout__3.nc"), None);
    }

    #[test]
    fn test_cycle_dir_date() {
        assert_eq!(
            cycle_dir_date("2024011000").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
        );
        assert!(cycle_dir_date("20240110").is_ok());
        assert!(cycle_dir_date("latest").is_err());
        assert!(cycle_dir_date("2024x1100").is_err());
    }
}
