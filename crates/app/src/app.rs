use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::{
    Layer, filter::LevelFilter, filter::filter_fn, fmt, layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("toml error in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("section [{section}] in {} is invalid: {reason}", .path.display())]
    Section {
        path: PathBuf,
        section: String,
        reason: String,
    },
}

/// Application infrastructure context.
///
/// Owns the data directory layout and the logging worker. Every binary in
/// the workspace starts by building one.
pub struct AppContext {
    data_dir: PathBuf,
    version: &'static str,
    app_id: &'static str,
    /// Keeps the non-blocking log writer flushing until the app exits.
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl AppContext {
    pub fn app_id(&self) -> &str {
        self.app_id
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn saves_dir(&self) -> PathBuf {
        self.data_dir.join("saves")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.toml")
    }

    /// Reads one typed section of the app's settings file.
    pub fn load_section<S>(&self, section: &str) -> Result<S, SettingsError>
    where
        S: DeserializeOwned + Default,
    {
        load_section(&self.settings_file(), section)
    }

    fn ensure_directories(&self) -> io::Result<()> {
        for dir in [self.data_dir.clone(), self.logs_dir(), self.saves_dir()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Application metadata trait.
///
/// Define your application's identity by implementing this trait.
pub trait Application: Sized + 'static {
    const APP_ID: &'static str;
    const PROJECT_ID: &'static str = "scene_flow";
}

/// Builder for creating applications with proper initialization.
pub struct AppBuilder<A: Application> {
    base_dir: PathBuf,
    version: &'static str,
    file_logging: bool,
    _marker: PhantomData<A>,
}

impl<A: Application> AppBuilder<A> {
    /// Debug builds keep their data in `.out/` at the workspace root, release
    /// builds use the platform data directory.
    pub fn new(version: &'static str) -> Self {
        #[cfg(debug_assertions)]
        let base_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join(".out");
        #[cfg(not(debug_assertions))]
        let base_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));

        Self::with_base_dir(base_dir, version)
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>, version: &'static str) -> Self {
        Self {
            base_dir: base_dir.into(),
            version,
            file_logging: true,
            _marker: PhantomData,
        }
    }

    /// Console logging only.
    pub fn without_file_logging(mut self) -> Self {
        self.file_logging = false;
        self
    }

    /// Creates the data directories and installs the global subscriber.
    ///
    /// When a subscriber is already installed (tests, embedding hosts) the
    /// existing one is kept.
    pub fn build(self) -> Result<AppContext, BoxError> {
        let mut context = AppContext {
            data_dir: self.base_dir.join(A::PROJECT_ID).join(A::APP_ID),
            version: self.version,
            app_id: A::APP_ID,
            _log_guard: None,
        };
        context.ensure_directories()?;

        #[cfg(debug_assertions)]
        let level = LevelFilter::INFO;

        #[cfg(not(debug_assertions))]
        let level = LevelFilter::WARN;

        let console_layer = fmt::Layer::default()
            .with_target(false)
            .with_filter(filter_fn(move |metadata| metadata.level() <= &level));

        let file_layer = if self.file_logging {
            let log_name = format!(
                "{}_{}.log",
                A::APP_ID,
                chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
            );
            let file_appender = tracing_appender::rolling::never(context.logs_dir(), log_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            context._log_guard = Some(guard);
            Some(
                fmt::Layer::default()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .with_filter(filter_fn(move |metadata| metadata.level() <= &level)),
            )
        } else {
            None
        };

        if tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer)
            .try_init()
            .is_err()
        {
            debug!("global subscriber already installed, keeping it");
        }

        debug!(
            app = A::APP_ID,
            version = self.version,
            data_dir = %context.data_dir.display(),
            "application context ready"
        );
        Ok(context)
    }
}

/// Reads `[section]` from the TOML file at `path` into `S`.
///
/// A missing file or a missing section yields `S::default()`; fields absent
/// from the section fall back through `S`'s own serde defaults.
pub fn load_section<S>(path: &Path, section: &str) -> Result<S, SettingsError>
where
    S: DeserializeOwned + Default,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(S::default());
        }
        Err(err) => return Err(err.into()),
    };

    let mut table: toml::Table = text.parse().map_err(|source| SettingsError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(value) = table.remove(section) else {
        return Ok(S::default());
    };

    value.try_into().map_err(|err: toml::de::Error| SettingsError::Section {
        path: path.to_path_buf(),
        section: section.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(default)]
    struct Audio {
        volume: f32,
        muted: bool,
    }

    impl Default for Audio {
        fn default() -> Self {
            Self {
                volume: 0.8,
                muted: false,
            }
        }
    }

    struct TestApp;

    impl Application for TestApp {
        const APP_ID: &'static str = "test_app";
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let audio: Audio = load_section(&dir.path().join("nope.toml"), "audio").unwrap();
        assert_eq!(audio, Audio::default());
    }

    #[test]
    fn section_is_read_with_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[audio]\nmuted = true\n\n[video]\nvsync = false\n").unwrap();

        let audio: Audio = load_section(&path, "audio").unwrap();
        assert_eq!(
            audio,
            Audio {
                volume: 0.8,
                muted: true
            }
        );
    }

    #[test]
    fn malformed_file_and_section_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        fs::write(&path, "[audio\nmuted = true").unwrap();
        assert!(matches!(
            load_section::<Audio>(&path, "audio"),
            Err(SettingsError::Toml { .. })
        ));

        fs::write(&path, "[audio]\nvolume = \"loud\"\n").unwrap();
        assert!(matches!(
            load_section::<Audio>(&path, "audio"),
            Err(SettingsError::Section { .. })
        ));
    }

    #[test]
    fn context_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let context = AppBuilder::<TestApp>::with_base_dir(dir.path(), "0.0.1")
            .without_file_logging()
            .build()
            .unwrap();

        assert_eq!(context.app_id(), "test_app");
        assert!(context.data_dir().ends_with("scene_flow/test_app"));
        assert!(context.logs_dir().is_dir());
        assert!(context.saves_dir().is_dir());

        let audio: Audio = context.load_section("audio").unwrap();
        assert_eq!(audio, Audio::default());
    }
}
