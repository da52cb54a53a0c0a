//! In-memory grid model for member and aggregated artifacts, and the codec
//! seam used to read and write them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
#[cfg(test)]
use std::fs::File;
#[cfg(test)]
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while reading, combining or writing datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Shape, dims, coords and values disagree.
    #[error("inconsistent layout: {0}")]
    Layout(String),

    /// A member does not line up with the first member.
    #[error("member {member} does not match the ensemble layout: {reason}")]
    Mismatch {
        /// Offending member index.
        member: u32,
        /// Which part differs.
        reason: String,
    },

    /// Nothing to combine.
    #[error("no member datasets to combine")]
    Empty,

    /// Reading or writing failed.
    #[error("codec error at {}: {message}", path.display())]
    Codec {
        /// File involved.
        path: PathBuf,
        /// Underlying failure.
        message: String,
    },
}

/// One variable on a named, row-major grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Variable name, e.g. `Qout`.
    pub variable: String,
    /// Dimension names, outermost first.
    pub dims: Vec<String>,
    /// Dimension lengths, parallel to `dims`.
    pub shape: Vec<usize>,
    /// Coordinate labels keyed by dimension name.
    #[serde(default)]
    pub coords: BTreeMap<String, Vec<f64>>,
    /// Free-form attributes.
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Values in row-major order.
    pub values: Vec<f64>,
}

impl Dataset {
    /// Build a dataset from `(dim, len)` pairs and values.
    pub fn new(
        variable: impl Into<String>,
        dims: &[(&str, usize)],
        values: Vec<f64>,
    ) -> Result<Self, DatasetError> {
        let dataset = Self {
            variable: variable.into(),
            dims: dims.iter().map(|(name, _)| name.to_string()).collect(),
            shape: dims.iter().map(|(_, len)| *len).collect(),
            coords: BTreeMap::new(),
            attrs: BTreeMap::new(),
            values,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Attach coordinate labels to a dimension.
    pub fn with_coord(mut self, dim: &str, labels: Vec<f64>) -> Result<Self, DatasetError> {
        self.coords.insert(dim.to_string(), labels);
        self.validate()?;
        Ok(self)
    }

    /// Check that dims, shape, coords and values agree.
    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.dims.len() != self.shape.len() {
            return Err(DatasetError::Layout(format!(
                "{} dims but {} lengths",
                self.dims.len(),
                self.shape.len()
            )));
        }

        let expected: usize = self.shape.iter().product();
        if expected != self.values.len() {
            return Err(DatasetError::Layout(format!(
                "shape {:?} needs {} values, found {}",
                self.shape,
                expected,
                self.values.len()
            )));
        }

        for (dim, labels) in &self.coords {
            let position = self
                .dims
                .iter()
                .position(|d| d == dim)
                .ok_or_else(|| DatasetError::Layout(format!("coordinate {} has no dimension", dim)))?;
            if labels.len() != self.shape[position] {
                return Err(DatasetError::Layout(format!(
                    "coordinate {} has {} labels for length {}",
                    dim,
                    labels.len(),
                    self.shape[position]
                )));
            }
        }

        Ok(())
    }

    /// Length of a named dimension.
    pub fn dim_len(&self, dim: &str) -> Option<usize> {
        self.dims
            .iter()
            .position(|d| d == dim)
            .map(|position| self.shape[position])
    }

    fn layout_difference(&self, other: &Dataset) -> Option<String> {
        if self.variable != other.variable {
            return Some(format!(
                "variable {} != {}",
                other.variable, self.variable
            ));
        }
        if self.dims != other.dims {
            return Some(format!("dims {:?} != {:?}", other.dims, self.dims));
        }
        if self.shape != other.shape {
            return Some(format!("shape {:?} != {:?}", other.shape, self.shape));
        }
        if self.coords != other.coords {
            return Some("coordinate labels differ".to_string());
        }
        None
    }

    /// Stack members along a new leading axis named `axis`, in the given
    /// order. The axis coordinate holds the member indices.
    pub fn stack(members: &[(u32, Dataset)], axis: &str) -> Result<Dataset, DatasetError> {
        let (_, first) = members.first().ok_or(DatasetError::Empty)?;
        check_layouts(members)?;

        if first.dims.iter().any(|d| d == axis) {
            return Err(DatasetError::Layout(format!(
                "member datasets already have a {} dimension",
                axis
            )));
        }

        let mut dims = Vec::with_capacity(first.dims.len() + 1);
        dims.push(axis.to_string());
        dims.extend(first.dims.iter().cloned());

        let mut shape = Vec::with_capacity(first.shape.len() + 1);
        shape.push(members.len());
        shape.extend(first.shape.iter().copied());

        let mut coords = first.coords.clone();
        coords.insert(
            axis.to_string(),
            members.iter().map(|(index, _)| f64::from(*index)).collect(),
        );

        let mut values = Vec::with_capacity(members.len() * first.values.len());
        for (_, member) in members {
            values.extend_from_slice(&member.values);
        }

        let stacked = Dataset {
            variable: first.variable.clone(),
            dims,
            shape,
            coords,
            attrs: first.attrs.clone(),
            values,
        };
        stacked.validate()?;
        Ok(stacked)
    }

    /// Element-wise arithmetic mean over members.
    pub fn mean(members: &[(u32, Dataset)]) -> Result<Dataset, DatasetError> {
        let (_, first) = members.first().ok_or(DatasetError::Empty)?;
        check_layouts(members)?;

        let mut sums = vec![0.0_f64; first.values.len()];
        for (_, member) in members {
            for (sum, value) in sums.iter_mut().zip(&member.values) {
                *sum += value;
            }
        }

        let count = members.len() as f64;
        let mut mean = first.clone();
        mean.values = sums.into_iter().map(|sum| sum / count).collect();
        mean.attrs
            .insert("ensemble_members".to_string(), members.len().to_string());
        Ok(mean)
    }

    /// Whether `member` is exactly the slab labelled `index` along the
    /// leading `axis` of this stacked dataset.
    pub fn contains_member(&self, axis: &str, index: u32, member: &Dataset) -> bool {
        if self.dims.first().map(String::as_str) != Some(axis)
            || self.variable != member.variable
            || self.dims[1..] != member.dims[..]
            || self.shape.get(1..) != Some(member.shape.as_slice())
        {
            return false;
        }
        if member
            .coords
            .iter()
            .any(|(dim, labels)| self.coords.get(dim) != Some(labels))
        {
            return false;
        }

        let label = f64::from(index);
        let Some(position) = self
            .coords
            .get(axis)
            .and_then(|labels| labels.iter().position(|l| *l == label))
        else {
            return false;
        };

        let len = member.values.len();
        let start = position * len;
        match self.values.get(start..start + len) {
            Some(slab) => slab
                .iter()
                .zip(&member.values)
                .all(|(a, b)| a == b || (a.is_nan() && b.is_nan())),
            None => false,
        }
    }
}

fn check_layouts(members: &[(u32, Dataset)]) -> Result<(), DatasetError> {
    let Some((_, first)) = members.first() else {
        return Err(DatasetError::Empty);
    };
    first.validate()?;

    for (index, member) in &members[1..] {
        member.validate().map_err(|e| DatasetError::Mismatch {
            member: *index,
            reason: e.to_string(),
        })?;
        if let Some(reason) = first.layout_difference(member) {
            return Err(DatasetError::Mismatch {
                member: *index,
                reason,
            });
        }
    }
    Ok(())
}

/// Reads and writes datasets in a concrete file format.
pub trait DatasetCodec: Send + Sync {
    /// Read a dataset from `path`.
    fn read(&self, path: &Path) -> Result<Dataset, DatasetError>;

    /// Write `dataset` to `path`, replacing whatever is there.
    fn write(&self, dataset: &Dataset, path: &Path) -> Result<(), DatasetError>;
}

fn codec_error(path: &Path) -> impl Fn(String) -> DatasetError + '_ {
    move |message| DatasetError::Codec {
        path: path.to_path_buf(),
        message,
    }
}

/// NetCDF files holding one data variable plus its coordinate variables.
///
/// Coordinates are the 1-D variables named after a dimension of the data
/// variable; string attributes of the data variable become `attrs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetcdfCodec {
    variable: String,
}

/// Data variable written by the routing model.
pub const DEFAULT_VARIABLE: &str = "Qout";

impl Default for NetcdfCodec {
    fn default() -> Self {
        Self::new(DEFAULT_VARIABLE)
    }
}

impl NetcdfCodec {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

impl DatasetCodec for NetcdfCodec {
    fn read(&self, path: &Path) -> Result<Dataset, DatasetError> {
        let fail = codec_error(path);

        let file = netcdf::open(path).map_err(|e| fail(e.to_string()))?;
        let var = file
            .variable(&self.variable)
            .ok_or_else(|| fail(format!("no variable named {}", self.variable)))?;

        let dims: Vec<(String, usize)> = var
            .dimensions()
            .iter()
            .map(|dim| (dim.name(), dim.len()))
            .collect();
        let values = var
            .get_values::<f64, _>(..)
            .map_err(|e| fail(format!("reading {}: {}", self.variable, e)))?;

        let mut coords = BTreeMap::new();
        for (name, len) in &dims {
            let Some(coord) = file.variable(name) else {
                continue;
            };
            let is_coordinate = coord.dimensions().len() == 1 && coord.dimensions()[0].name() == *name;
            if !is_coordinate {
                continue;
            }
            let labels = coord
                .get_values::<f64, _>(..)
                .map_err(|e| fail(format!("reading coordinate {}: {}", name, e)))?;
            if labels.len() == *len {
                coords.insert(name.clone(), labels);
            }
        }

        let mut attrs = BTreeMap::new();
        for attr in var.attributes() {
            if let Ok(netcdf::AttributeValue::Str(value)) = attr.value() {
                attrs.insert(attr.name().to_string(), value);
            }
        }

        let dataset = Dataset {
            variable: self.variable.clone(),
            dims: dims.iter().map(|(name, _)| name.clone()).collect(),
            shape: dims.iter().map(|(_, len)| *len).collect(),
            coords,
            attrs,
            values,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    fn write(&self, dataset: &Dataset, path: &Path) -> Result<(), DatasetError> {
        let fail = codec_error(path);
        dataset.validate()?;

        let mut file = netcdf::create(path).map_err(|e| fail(e.to_string()))?;

        for (name, len) in dataset.dims.iter().zip(&dataset.shape) {
            file.add_dimension(name, *len)
                .map_err(|e| fail(format!("dimension {}: {}", name, e)))?;
        }

        for (dim, labels) in &dataset.coords {
            let mut coord = file
                .add_variable::<f64>(dim, &[dim.as_str()])
                .map_err(|e| fail(format!("coordinate {}: {}", dim, e)))?;
            coord
                .put_values(labels.as_slice(), ..)
                .map_err(|e| fail(format!("coordinate {}: {}", dim, e)))?;
        }

        let dims: Vec<&str> = dataset.dims.iter().map(String::as_str).collect();
        let mut var = file
            .add_variable::<f64>(&dataset.variable, &dims)
            .map_err(|e| fail(format!("variable {}: {}", dataset.variable, e)))?;
        for (name, value) in &dataset.attrs {
            var.put_attribute(name, value.as_str())
                .map_err(|e| fail(format!("attribute {}: {}", name, e)))?;
        }
        var.put_values(dataset.values.as_slice(), ..)
            .map_err(|e| fail(format!("variable {}: {}", dataset.variable, e)))?;

        Ok(())
    }
}

/// Stores datasets as JSON documents. Lets tests compare artifacts byte for
/// byte without going through libnetcdf.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(test)]
impl DatasetCodec for JsonCodec {
    fn read(&self, path: &Path) -> Result<Dataset, DatasetError> {
        let fail = codec_error(path);

        let file = File::open(path).map_err(|e| fail(e.to_string()))?;
        let dataset: Dataset =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| fail(e.to_string()))?;
        dataset.validate()?;
        Ok(dataset)
    }

    fn write(&self, dataset: &Dataset, path: &Path) -> Result<(), DatasetError> {
        let fail = codec_error(path);

        let file = File::create(path).map_err(|e| fail(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, dataset).map_err(|e| fail(e.to_string()))?;
        let file = writer.into_inner().map_err(|e| fail(e.to_string()))?;
        file.sync_all().map_err(|e| fail(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(value: f64) -> Dataset {
        Dataset::new("Qout", &[("time", 2), ("rivid", 3)], vec![value; 6])
            .unwrap()
            .with_coord("rivid", vec![101.0, 102.0, 103.0])
            .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_layout() {
        assert!(Dataset::new("Qout", &[("time", 2)], vec![1.0]).is_err());
        assert!(member(1.0).with_coord("rivid", vec![1.0]).is_err());
        assert!(member(1.0).with_coord("missing", vec![1.0]).is_err());
    }

    #[test]
    fn test_stack_adds_leading_axis() {
        let members = vec![(1, member(1.0)), (2, member(2.0)), (10, member(10.0))];
        let stacked = Dataset::stack(&members, "ensemble").unwrap();

        assert_eq!(stacked.dims, vec!["ensemble", "time", "rivid"]);
        assert_eq!(stacked.shape, vec![3, 2, 3]);
        assert_eq!(stacked.coords["ensemble"], vec![1.0, 2.0, 10.0]);
        assert_eq!(stacked.coords["rivid"], vec![101.0, 102.0, 103.0]);
        assert_eq!(&stacked.values[..6], &[1.0; 6]);
        assert_eq!(&stacked.values[12..], &[10.0; 6]);
    }

    #[test]
    fn test_mean_is_elementwise() {
        let members = vec![(1, member(1.0)), (2, member(2.0)), (3, member(6.0))];
        let mean = Dataset::mean(&members).unwrap();
        assert_eq!(mean.shape, vec![2, 3]);
        assert!(mean.values.iter().all(|v| (*v - 3.0).abs() < 1e-12));
        assert_eq!(mean.attrs["ensemble_members"], "3");
    }

    #[test]
    fn test_mismatched_member_rejected() {
        let odd = Dataset::new("Qout", &[("time", 3), ("rivid", 2)], vec![0.0; 6]).unwrap();
        let members = vec![(1, member(1.0)), (2, odd)];
        let err = Dataset::stack(&members, "ensemble").unwrap_err();
        assert!(matches!(err, DatasetError::Mismatch { member: 2, .. }));
        assert!(Dataset::mean(&members).is_err());
        assert!(matches!(
            Dataset::stack(&[], "ensemble"),
            Err(DatasetError::Empty)
        ));
    }

    #[test]
    fn test_contains_member() {
        let members = vec![(1, member(1.0)), (2, member(2.0)), (5, member(5.0))];
        let stacked = Dataset::stack(&members, "ensemble").unwrap();

        assert!(stacked.contains_member("ensemble", 2, &member(2.0)));
        assert!(stacked.contains_member("ensemble", 5, &member(5.0)));
        assert!(!stacked.contains_member("ensemble", 2, &member(2.5)));
        assert!(!stacked.contains_member("ensemble", 3, &member(2.0)));
        assert!(!stacked.contains_member("time", 2, &member(2.0)));

        let other_rivers = member(2.0).with_coord("rivid", vec![1.0, 2.0, 3.0]).unwrap();
        assert!(!stacked.contains_member("ensemble", 2, &other_rivers));
    }

    #[test]
    fn test_json_codec_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Qout_718_1.nc");
        JsonCodec.write(&member(4.5), &path).unwrap();

        assert_eq!(JsonCodec.read(&path).unwrap(), member(4.5));
    }

    #[test]
    fn test_netcdf_codec_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let members = vec![(1, member(1.0)), (2, member(2.0))];
        let stacked = Dataset::stack(&members, "ensemble").unwrap();
        let mut mean = Dataset::mean(&members).unwrap();
        mean.attrs.insert("units".to_string(), "m3 s-1".to_string());

        let codec = NetcdfCodec::default();
        let stacked_path = dir.path().join("Qout_718.nc");
        let mean_path = dir.path().join("nces_avg_718.nc");
        codec.write(&stacked, &stacked_path).unwrap();
        codec.write(&mean, &mean_path).unwrap();

        let read_back = codec.read(&stacked_path).unwrap();
        assert_eq!(read_back.dims, vec!["ensemble", "time", "rivid"]);
        assert_eq!(read_back.coords["ensemble"], vec![1.0, 2.0]);
        assert_eq!(read_back.coords["rivid"], vec![101.0, 102.0, 103.0]);
        assert_eq!(read_back.values, stacked.values);

        let mean_back = codec.read(&mean_path).unwrap();
        assert_eq!(mean_back.attrs["units"], "m3 s-1");
        assert_eq!(mean_back.attrs["ensemble_members"], "2");
        assert_eq!(mean_back.values, mean.values);
    }

    #[test]
    fn test_netcdf_codec_rejects_other_formats() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Qout_718_1.nc");
        JsonCodec.write(&member(1.0), &path).unwrap();

        assert!(matches!(
            NetcdfCodec::default().read(&path),
            Err(DatasetError::Codec { .. })
        ));
        assert!(matches!(
            NetcdfCodec::new("streamflow").read(&dir.path().join("absent.nc")),
            Err(DatasetError::Codec { .. })
        ));
    }
}
