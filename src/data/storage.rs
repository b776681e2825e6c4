//! Waveform and log persistence.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/
//!   <YYYY_MM_DD>/
//!     logfile.json                  { "data": [Row...] }
//!     TestID_<id>/
//!       <secs>_<micros>.json        history, one per single acquisition
//!       sweep_<stamp>_<i>_<f>MHz.json  history, one per sweep point
//!       current.json                latest waveform for this test
//!   Trash/
//!     logfile.json
//!     <YYYY_MM_DD>_TestID_<id>/
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, history
//! before `current`, so an interrupted save never leaves `current` ahead of the
//! history it was copied from.
use crate::{
    core::Waveform,
    experiment::{run_table::KEY_TESTID, SweepContext, TestRow},
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Latest waveform of a test, overwritten each save
pub const CURRENT_FILE: &str = "current.json";
/// Per-date list of logged tests
pub const LOG_FILE: &str = "logfile.json";
/// Where trashed tests are moved
pub const TRASH_DIR: &str = "Trash";

/// Where a waveform ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReceipt {
    /// The timestamped history file
    pub history: PathBuf,
    /// The overwritten `current.json`
    pub current: PathBuf,
    /// True when this save created the test's directory
    pub first_save: bool,
}

/// Persistence contract used by the orchestrator.
#[async_trait]
pub trait RunStore: Send {
    /// Write the history copy and the `current` snapshot for `row`.
    async fn save_waveform(
        &mut self,
        waveform: &Waveform,
        row: &TestRow,
        sweep: Option<&SweepContext>,
    ) -> Result<SaveReceipt>;

    /// Add `row` to its date log. Returns false when the log already holds
    /// an entry with the same `testid`.
    async fn append_log(&mut self, row: &TestRow) -> Result<bool>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LogFile {
    #[serde(default)]
    data: Vec<Value>,
}

/// JSON-file store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    data_dir: PathBuf,
}

impl JsonStore {
    /// Store rooted at `data_dir`; created lazily.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Root of the data tree.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `<data_dir>/<date>/logfile.json`
    pub fn log_path(&self, date_fname: &str) -> PathBuf {
        self.data_dir.join(date_fname).join(LOG_FILE)
    }

    /// `<data_dir>/Trash`
    pub fn trash_dir(&self) -> PathBuf {
        self.data_dir.join(TRASH_DIR)
    }

    /// Entries of the log for one date folder; empty when there is none yet.
    pub fn load_log(&self, date_fname: &str) -> Result<Vec<Value>> {
        Ok(read_log(&self.log_path(date_fname))?.data)
    }

    /// Move a test to the trash.
    ///
    /// The test directory moves to `Trash/<date>_TestID_<id>`, its log entry is
    /// appended to the trash log and removed from the date log.
    pub fn trash_test(&self, date_fname: &str, testid: &str) -> Result<PathBuf> {
        let log_path = self.log_path(date_fname);
        let mut log = read_log(&log_path)?;
        let position = log
            .data
            .iter()
            .position(|entry| entry_testid(entry).as_deref() == Some(testid))
            .ok_or_else(|| anyhow!("Test '{}' is not in the log for {}", testid, date_fname))?;

        let trash = self.trash_dir();
        fs::create_dir_all(&trash)
            .with_context(|| format!("Failed to create trash directory at {:?}", trash))?;

        let source = self
            .data_dir
            .join(date_fname)
            .join(format!("TestID_{testid}"));
        let mut target = trash.join(format!("{date_fname}_TestID_{testid}"));
        if target.exists() {
            target = trash.join(format!(
                "{date_fname}_TestID_{testid}_{}",
                chrono::Utc::now().timestamp()
            ));
        }
        if source.exists() {
            fs::rename(&source, &target)
                .with_context(|| format!("Failed to move {:?} to {:?}", source, target))?;
        } else {
            warn!("Test directory {:?} is already gone; trashing log entry only", source);
        }

        let entry = log.data.remove(position);
        let trash_log_path = trash.join(LOG_FILE);
        let mut trash_log = read_log(&trash_log_path)?;
        trash_log.data.push(entry);
        write_json_atomic(&trash_log_path, &trash_log)?;
        write_json_atomic(&log_path, &log)?;

        info!("Moved test {} from {} to the trash.", testid, date_fname);
        Ok(target)
    }

    fn history_name(sweep: Option<&SweepContext>) -> String {
        match sweep {
            Some(ctx) => format!(
                "sweep_{}_{:03}_{}MHz.json",
                ctx.stamp_label(),
                ctx.index,
                ctx.frequency_mhz
            ),
            None => {
                let now = chrono::Utc::now();
                format!("{}_{:06}.json", now.timestamp(), now.timestamp_subsec_micros())
            }
        }
    }
}

#[async_trait]
impl RunStore for JsonStore {
    async fn save_waveform(
        &mut self,
        waveform: &Waveform,
        row: &TestRow,
        sweep: Option<&SweepContext>,
    ) -> Result<SaveReceipt> {
        let dir = row.test_dir(&self.data_dir);
        let first_save = !dir.exists();
        if first_save {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create test directory at {:?}", dir))?;
            debug!("Created test directory {:?}", dir);
        }

        let history = dir.join(Self::history_name(sweep));
        let current = dir.join(CURRENT_FILE);

        write_json_atomic(&history, waveform)?;
        write_json_atomic(&current, waveform)?;

        Ok(SaveReceipt {
            history,
            current,
            first_save,
        })
    }

    async fn append_log(&mut self, row: &TestRow) -> Result<bool> {
        let path = self.log_path(&row.date_fname);
        let mut log = read_log(&path)?;
        if log
            .data
            .iter()
            .any(|entry| entry_testid(entry).as_deref() == Some(row.testid.as_str()))
        {
            return Ok(false);
        }
        log.data.push(row.log_entry());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create date directory at {:?}", parent))?;
        }
        write_json_atomic(&path, &log)?;
        info!("Logged test {} in {:?}", row.testid, path);
        Ok(true)
    }
}

fn entry_testid(entry: &Value) -> Option<String> {
    match entry.get(KEY_TESTID)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_log(path: &Path) -> Result<LogFile> {
    if !path.exists() {
        return Ok(LogFile::default());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read log at {:?}", path))?;
    if text.trim().is_empty() {
        return Ok(LogFile::default());
    }
    serde_json::from_str(&text).with_context(|| format!("Log at {:?} is not valid JSON", path))
}

/// Serialize `value` to a temporary sibling of `path`, then rename over it.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        bail!("Cannot write to {:?}: no file name", path);
    };
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    let body = serde_json::to_vec(value).context("Failed to serialize JSON")?;
    fs::write(&tmp, body).with_context(|| format!("Failed to write {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {:?} into place", tmp))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{expand, FrequencySpec, RawRow};
    use serde_json::json;

    fn test_row(testid: &str, freq: &str) -> TestRow {
        let value = json!({
            "testid": testid,
            "run(y/n)": "y",
            "mode(tr/pe)": "pe",
            "channel": "3",
            "gain(db)": 20,
            "freq(mhz)": freq,
            "time(us)": 10,
            "delay(us)": 0,
            "filtermode": "22",
            "startdate": "Mar 04 2026 10:00:00"
        });
        let Value::Object(map) = value else {
            unreachable!()
        };
        RawRow(map).validate().unwrap()
    }

    fn waveform(gain: f64) -> Waveform {
        Waveform {
            time_us: vec![0.0, 0.008, 0.016],
            amp: vec![0.0, 1.0, -1.0],
            gain,
        }
    }

    #[tokio::test]
    async fn test_save_writes_history_and_current() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::new(dir.path());
        let row = test_row("5", "2.25");

        let receipt = store.save_waveform(&waveform(20.0), &row, None).await.unwrap();
        assert!(receipt.first_save);
        assert!(receipt.history.exists());
        assert_eq!(
            receipt.current,
            dir.path().join("2026_03_04").join("TestID_5").join("current.json")
        );

        let saved: Waveform =
            serde_json::from_str(&fs::read_to_string(&receipt.current).unwrap()).unwrap();
        assert_eq!(saved, waveform(20.0));

        let second = store.save_waveform(&waveform(21.0), &row, None).await.unwrap();
        assert!(!second.first_save);
        let current: Waveform =
            serde_json::from_str(&fs::read_to_string(&second.current).unwrap()).unwrap();
        assert_eq!(current.gain, 21.0);

        // No temporary files left behind
        let leftovers = fs::read_dir(dir.path().join("2026_03_04").join("TestID_5"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_sweep_history_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::new(dir.path());
        let row = test_row("9", "1,2,3");
        let FrequencySpec::Sweep(_) = row.frequency else {
            unreachable!()
        };

        let instances = expand(&row.frequency, chrono::Utc::now());
        let mut names = Vec::new();
        for inst in &instances {
            let receipt = store
                .save_waveform(&waveform(20.0), &row, inst.sweep.as_ref())
                .await
                .unwrap();
            names.push(receipt.history.file_name().unwrap().to_string_lossy().into_owned());
        }
        assert_eq!(names.len(), 3);
        assert!(names[0].starts_with("sweep_") && names[0].ends_with("_000_1MHz.json"));
        assert!(names[1].ends_with("_001_1.5MHz.json"));
        assert!(names[2].ends_with("_002_2MHz.json"));
    }

    #[tokio::test]
    async fn test_append_log_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::new(dir.path());
        let row = test_row("5", "2.25");

        assert!(store.append_log(&row).await.unwrap());
        assert!(!store.append_log(&row).await.unwrap());
        assert!(store.append_log(&test_row("6", "2.25")).await.unwrap());

        let log = store.load_log("2026_03_04").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0]["testid"], json!("5"));
        assert_eq!(log[0]["date_fname"], json!("2026_03_04"));
    }

    #[tokio::test]
    async fn test_trash_test() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::new(dir.path());
        let row = test_row("5", "2.25");
        store.save_waveform(&waveform(20.0), &row, None).await.unwrap();
        store.append_log(&row).await.unwrap();

        let target = store.trash_test("2026_03_04", "5").unwrap();
        assert!(target.join("current.json").exists());
        assert!(!row.test_dir(dir.path()).exists());
        assert!(store.load_log("2026_03_04").unwrap().is_empty());

        let trash_log = read_log(&store.trash_dir().join(LOG_FILE)).unwrap();
        assert_eq!(trash_log.data.len(), 1);

        assert!(store.trash_test("2026_03_04", "5").is_err());
    }

    #[test]
    fn test_load_log_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        assert!(store.load_log("2030_01_01").unwrap().is_empty());
    }
}
