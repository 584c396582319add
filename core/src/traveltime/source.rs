use crate::prelude::{PipelineError, PipelineResult};
use crate::traveltime::table::StationTravelTimes;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Where per-station travel-time rows come from. Implementations read the
/// current contents every time `load` is called.
pub trait TravelTimeSource: Send + Sync {
    fn load(&self) -> PipelineResult<Vec<StationTravelTimes>>;

    fn describe(&self) -> String;
}

/// Rows held in memory; `replace` stands in for the files changing on disk.
#[derive(Debug, Default)]
pub struct InMemorySource {
    rows: RwLock<Vec<StationTravelTimes>>,
}

impl InMemorySource {
    pub fn new(rows: Vec<StationTravelTimes>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub fn replace(&self, rows: Vec<StationTravelTimes>) {
        if let Ok(mut guard) = self.rows.write() {
            *guard = rows;
        }
    }
}

impl TravelTimeSource for InMemorySource {
    fn load(&self) -> PipelineResult<Vec<StationTravelTimes>> {
        self.rows
            .read()
            .map(|rows| rows.clone())
            .map_err(|_| PipelineError::Internal("in-memory travel times poisoned".into()))
    }

    fn describe(&self) -> String {
        "in-memory travel times".into()
    }
}

/// Directory of `<prefix>*_ttimes.json` files, one per station.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    dir: PathBuf,
    prefix: String,
}

const SUFFIX: &str = "_ttimes.json";

impl JsonDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn matching_files(&self) -> PipelineResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with(&self.prefix) && name.ends_with(SUFFIX))
                .unwrap_or(false);
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Writes one station's row where `load` will find it.
    pub fn write(&self, row: &StationTravelTimes) -> PipelineResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}.{}{}", self.prefix, row.station, SUFFIX));
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(writer, row)?;
        Ok(path)
    }
}

impl TravelTimeSource for JsonDirectorySource {
    fn load(&self) -> PipelineResult<Vec<StationTravelTimes>> {
        let files = self.matching_files()?;
        if files.is_empty() {
            return Err(PipelineError::TravelTime(format!(
                "no {}*{} files in {}",
                self.prefix,
                SUFFIX,
                self.dir.display()
            )));
        }
        files
            .iter()
            .map(|path| -> PipelineResult<StationTravelTimes> {
                let reader = BufReader::new(File::open(path)?);
                Ok(serde_json::from_reader(reader)?)
            })
            .collect()
    }

    fn describe(&self) -> String {
        format!("{}/{}*{}", self.dir.display(), self.prefix, SUFFIX)
    }
}
