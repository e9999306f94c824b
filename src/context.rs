use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

use crate::config::LogConfig;
use crate::error::{HarnessError, Result};

pub const LOG_FILE: &str = "info.log";
pub const SCALARS_FILE: &str = "scalars.csv";

/// Logging and scalar-event state of one experiment run.
///
/// The tracing subscriber is installed for the current thread only and is
/// removed, together with the open file handles, when the context drops.
pub struct ExperimentContext {
    log_dir: Option<PathBuf>,
    scalars: Option<csv::Writer<File>>,
    _guard: Option<DefaultGuard>,
}

impl ExperimentContext {
    pub fn new(model_name: &str, config: &LogConfig) -> Result<Self> {
        let level = Level::from_str(&config.level)
            .map_err(|_| HarnessError::Config(format!("unknown log level {:?}", config.level)))?;

        let log_dir = if config.to_log_file || config.scalars {
            Some(create_log_dir(model_name, config)?)
        } else {
            None
        };

        let file_layer = match (&log_dir, config.to_log_file) {
            (Some(dir), true) => {
                let file = open_append(&dir.join(LOG_FILE))?;
                Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            }
            _ => None,
        };
        let stdout_layer = config
            .to_stdout
            .then(|| fmt::layer().with_writer(std::io::stdout));

        let guard = if file_layer.is_some() || stdout_layer.is_some() {
            let subscriber = tracing_subscriber::registry()
                .with(LevelFilter::from_level(level))
                .with(stdout_layer)
                .with(file_layer);
            Some(tracing::subscriber::set_default(subscriber))
        } else {
            None
        };

        let scalars = match (&log_dir, config.scalars) {
            (Some(dir), true) => Some(
                csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(open_append(&dir.join(SCALARS_FILE))?),
            ),
            _ => None,
        };

        Ok(Self {
            log_dir,
            scalars,
            _guard: guard,
        })
    }

    /// A context that neither logs nor records scalars.
    pub fn silent() -> Self {
        Self {
            log_dir: None,
            scalars: None,
            _guard: None,
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        if let Some(writer) = self.scalars.as_mut() {
            writer.write_record([tag, step.to_string().as_str(), value.to_string().as_str()])?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.scalars.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for ExperimentContext {
    fn drop(&mut self) {
        if let Some(writer) = self.scalars.as_mut() {
            let _ = writer.flush();
        }
    }
}

fn create_log_dir(model_name: &str, config: &LogConfig) -> Result<PathBuf> {
    let log_dir = match &config.log_dir {
        Some(dir) => PathBuf::from(dir),
        None => {
            let run_id = format!("{}_{}", model_name, chrono::Local::now().format("%m-%d-%H-%M-%S"));
            Path::new(&config.log_base_dir).join(run_id)
        }
    };
    fs::create_dir_all(&log_dir)?;

    Ok(log_dir)
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
