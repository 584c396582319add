use anyhow::{bail, Context};
use migcore::processing::FilterSpec;
use migcore::runtime::PipelineConfig;
use migcore::StackConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable consulted when the workflow file names no `base_path`.
pub const BASE_PATH_ENV: &str = "RTLOC_PATH";

fn default_point_workers() -> usize {
    10
}

fn default_distributor_workers() -> usize {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    pub outdir: String,
    /// File prefix selecting one travel-time grid inside `ttimes/`.
    pub time_grid: String,
    pub dt: f64,
    pub max_length: f64,
    pub safety_margin: f64,
    #[serde(default)]
    pub tolerance: Option<f64>,
    pub stations: Vec<String>,
    #[serde(default = "default_point_workers")]
    pub point_workers: usize,
    #[serde(default = "default_distributor_workers")]
    pub distributor_workers: usize,
    #[serde(default)]
    pub preprocessing: Vec<FilterSpec>,
}

/// Directories a run reads from and writes to, after verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowDirs {
    pub base: PathBuf,
    pub lib: PathBuf,
    pub out: PathBuf,
    pub ttimes: PathBuf,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Four synthetic stations at 100 Hz, used when no workflow file is given.
    pub fn synthetic() -> Self {
        Self {
            base_path: None,
            outdir: "synthetic".into(),
            time_grid: "synthetic.P".into(),
            dt: 0.01,
            max_length: 120.0,
            safety_margin: 0.5,
            tolerance: None,
            stations: (1..=4).map(|i| format!("STA{i:02}")).collect(),
            point_workers: default_point_workers(),
            distributor_workers: default_distributor_workers(),
            preprocessing: Vec::new(),
        }
    }

    pub fn stack_config(&self) -> StackConfig {
        let mut stack = StackConfig::new(self.dt, self.max_length, self.safety_margin);
        if let Some(tolerance) = self.tolerance {
            stack.tolerance = tolerance;
        }
        stack
    }

    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let config = PipelineConfig {
            stack: self.stack_config(),
            stations: self.stations.clone(),
            distributor_workers: self.distributor_workers,
            point_workers: self.point_workers,
            preprocessing: self.preprocessing.clone(),
        };
        config.validate().context("validating pipeline settings")?;
        Ok(config)
    }

    /// Checks `base/` and `base/lib/`, creating `base/out/<outdir>/ttimes/` as needed.
    pub fn resolve_dirs(&self) -> anyhow::Result<WorkflowDirs> {
        self.resolve_dirs_with(std::env::var_os(BASE_PATH_ENV).map(PathBuf::from))
    }

    fn resolve_dirs_with(&self, env_base: Option<PathBuf>) -> anyhow::Result<WorkflowDirs> {
        let base = match (&self.base_path, env_base) {
            (Some(base), _) => base.clone(),
            (None, Some(base)) => {
                log::info!("no base_path in workflow, using ${BASE_PATH_ENV}");
                base
            }
            (None, None) => bail!("no base_path in workflow and ${BASE_PATH_ENV} is not set"),
        };
        if !base.is_dir() {
            bail!("base path {} is not a directory", base.display());
        }
        let lib = base.join("lib");
        if !lib.is_dir() {
            bail!("directory {} does not exist", lib.display());
        }
        if self.outdir.is_empty() {
            bail!("outdir option not set");
        }
        let out = base.join("out").join(&self.outdir);
        let ttimes = out.join("ttimes");
        fs::create_dir_all(&ttimes)
            .with_context(|| format!("creating {}", ttimes.display()))?;
        Ok(WorkflowDirs {
            base,
            lib,
            out,
            ttimes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn config_load_reads_yaml_with_defaults() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"outdir: test\ntime_grid: Slow_len.100m.P\ndt: 0.01\nmax_length: 60.0\n\
safety_margin: 0.5\nstations: [AA, BB]\npreprocessing:\n  - kind: kurtosis\n    win: 3.0\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.stations, vec!["AA", "BB"]);
        assert_eq!(cfg.point_workers, 10);
        assert_eq!(cfg.distributor_workers, 4);
        assert_eq!(cfg.preprocessing, vec![FilterSpec::Kurtosis { win: 3.0 }]);
        assert!((cfg.stack_config().tolerance - 0.005).abs() < 1e-12);
    }

    #[test]
    fn explicit_tolerance_overrides_half_sample() {
        let mut cfg = WorkflowConfig::synthetic();
        cfg.tolerance = Some(0.001);
        assert_eq!(cfg.stack_config().tolerance, 0.001);
        assert!(cfg.pipeline_config().is_ok());
        cfg.tolerance = Some(0.5);
        assert!(cfg.pipeline_config().is_err());
    }

    #[test]
    fn resolve_dirs_creates_output_tree() {
        let base = tempdir().unwrap();
        fs::create_dir(base.path().join("lib")).unwrap();
        let mut cfg = WorkflowConfig::synthetic();
        cfg.base_path = Some(base.path().to_path_buf());
        let dirs = cfg.resolve_dirs_with(None).unwrap();
        assert_eq!(dirs.ttimes, base.path().join("out").join("synthetic").join("ttimes"));
        assert!(dirs.ttimes.is_dir());
        // second call finds everything in place
        assert_eq!(cfg.resolve_dirs_with(None).unwrap(), dirs);
    }

    #[test]
    fn resolve_dirs_falls_back_to_environment_and_needs_lib() {
        let base = tempdir().unwrap();
        let cfg = WorkflowConfig::synthetic();
        let err = cfg
            .resolve_dirs_with(Some(base.path().to_path_buf()))
            .unwrap_err();
        assert!(err.to_string().contains("lib"));

        fs::create_dir(base.path().join("lib")).unwrap();
        let dirs = cfg
            .resolve_dirs_with(Some(base.path().to_path_buf()))
            .unwrap();
        assert_eq!(dirs.base, base.path());
        assert!(cfg.resolve_dirs_with(None).is_err());
    }
}
