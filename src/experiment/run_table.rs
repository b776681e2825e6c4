//! The run table written by the UI, and validation of its rows.
//!
//! The table file is `{ "data": [Row...], "loop_delay": number }`. Rows are kept
//! as the raw JSON objects the UI wrote, since that is what the date log stores.
//! An active row is turned into a typed [`TestRow`] by [`RawRow::validate`]
//! before anything touches hardware or disk.

use super::sweep::FrequencySpec;
use crate::core::{AcquisitionParams, ChannelSelection, Mode};
use crate::error::{AppResult, DaqError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Row identifier. Column names match the UI's table keys.
pub const KEY_TESTID: &str = "testid";
/// `y` to acquire
pub const KEY_RUN: &str = "run(y/n)";
/// `tr` or `pe`
pub const KEY_MODE: &str = "mode(tr/pe)";
/// Primary channel cell
pub const KEY_CHANNEL: &str = "channel";
/// Optional second channel cell
pub const KEY_CHANNEL2: &str = "channel2";
/// Gain in dB
pub const KEY_GAIN: &str = "gain(db)";
/// Frequency or `start,stop,count` sweep, MHz
pub const KEY_FREQ: &str = "freq(mhz)";
/// Capture window, µs
pub const KEY_TIME: &str = "time(us)";
/// Capture delay, µs
pub const KEY_DELAY: &str = "delay(us)";
/// Filter setting passed through to the pulser
pub const KEY_FILTER: &str = "filtermode";
/// `Mon DD YYYY HH:MM:SS` test start
pub const KEY_STARTDATE: &str = "startdate";
/// Added to each log entry: the `YYYY_MM_DD` folder name
pub const KEY_DATE_FNAME: &str = "date_fname";

/// On-disk shape of the table file.
#[derive(Debug, Deserialize)]
struct TableFile {
    data: Vec<Map<String, Value>>,
    loop_delay: Value,
}

/// One pass worth of the run table.
#[derive(Debug, Clone)]
pub struct RunTable {
    /// Rows in file order, unvalidated
    pub rows: Vec<RawRow>,
    /// Pause after a pass, before the table is read again
    pub loop_delay: Duration,
}

impl RunTable {
    /// Read and parse the table file.
    ///
    /// A missing file, invalid JSON, a missing `data` array or an unusable
    /// `loop_delay` are all [`DaqError::TableLoad`]. Rows are not validated here.
    pub fn load(path: &Path) -> AppResult<Self> {
        let table_err = |reason: String| DaqError::TableLoad {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| table_err(e.to_string()))?;
        Self::parse(&text).map_err(table_err)
    }

    fn parse(text: &str) -> Result<Self, String> {
        let file: TableFile = serde_json::from_str(text).map_err(|e| e.to_string())?;
        let seconds = number_of(&file.loop_delay)
            .ok_or_else(|| format!("loop_delay '{}' is not a number", file.loop_delay))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(format!("loop_delay {seconds} must be a non-negative number"));
        }
        let loop_delay = Duration::try_from_secs_f64(seconds)
            .map_err(|e| format!("loop_delay {seconds} is out of range: {e}"))?;
        Ok(Self {
            rows: file.data.into_iter().map(RawRow).collect(),
            loop_delay,
        })
    }

    /// Overwrite the table file with `body`, after checking it parses.
    ///
    /// Returns the parsed table so the caller can report on it.
    pub fn save_raw(path: &Path, body: &str) -> AppResult<Self> {
        let table = Self::parse(body).map_err(|reason| DaqError::TableLoad {
            path: path.to_path_buf(),
            reason,
        })?;
        std::fs::write(path, body)?;
        Ok(table)
    }

    /// Rows marked `y`.
    pub fn active_rows(&self) -> impl Iterator<Item = &RawRow> {
        self.rows.iter().filter(|r| r.is_active())
    }
}

/// A row exactly as the UI wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(pub Map<String, Value>);

impl RawRow {
    /// The row identifier, or `"?"` when the cell is missing.
    pub fn testid(&self) -> String {
        text_of(self.0.get(KEY_TESTID)).unwrap_or_else(|| "?".to_string())
    }

    /// True when `run(y/n)` is `y`, case-insensitively.
    pub fn is_active(&self) -> bool {
        text_of(self.0.get(KEY_RUN)).is_some_and(|v| v.trim().eq_ignore_ascii_case("y"))
    }

    /// Check every field the orchestrator needs and build the typed row.
    pub fn validate(&self) -> AppResult<TestRow> {
        let testid = text_of(self.0.get(KEY_TESTID))
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.invalid("missing testid"))?;
        let testid = testid.trim().to_string();
        if !is_plain_name(&testid) {
            return Err(self.invalid(format!(
                "testid '{testid}' must be a plain name without path separators"
            )));
        }

        let mode_cell = self.required_text(KEY_MODE)?;
        let mode = Mode::parse(&mode_cell)
            .ok_or_else(|| self.invalid(format!("mode '{mode_cell}' is not 'tr' or 'pe'")))?;

        let primary = self.required_text(KEY_CHANNEL)?;
        let channels = match text_of(self.0.get(KEY_CHANNEL2)).filter(|s| !s.trim().is_empty()) {
            Some(second) => ChannelSelection::pair(primary.trim(), second.trim()),
            None => ChannelSelection::single(primary.trim()),
        };

        let gain_db = self.required_number(KEY_GAIN)?;
        let window_us = self.required_number(KEY_TIME)?;
        let delay_us = self.required_number(KEY_DELAY)?;
        if window_us <= 0.0 {
            return Err(self.invalid(format!("time(us) {window_us} must be positive")));
        }
        if delay_us < 0.0 {
            return Err(self.invalid(format!("delay(us) {delay_us} must not be negative")));
        }

        let freq_cell = self.required_text(KEY_FREQ)?;
        let frequency = FrequencySpec::parse(&freq_cell).map_err(|e| self.invalid(e))?;

        let filter_mode = text_of(self.0.get(KEY_FILTER)).unwrap_or_default();

        let startdate = self.required_text(KEY_STARTDATE)?;
        let date_fname = date_fname(&startdate).map_err(|e| self.invalid(e))?;

        Ok(TestRow {
            testid,
            mode,
            channels,
            gain_db,
            frequency,
            window_us,
            delay_us,
            filter_mode,
            startdate,
            date_fname,
            raw: self.clone(),
        })
    }

    fn required_text(&self, key: &str) -> AppResult<String> {
        text_of(self.0.get(key))
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| self.invalid(format!("missing '{key}'")))
    }

    fn required_number(&self, key: &str) -> AppResult<f64> {
        let value = self
            .0
            .get(key)
            .ok_or_else(|| self.invalid(format!("missing '{key}'")))?;
        number_of(value)
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(format!("'{key}' value {value} is not a number")))
    }

    fn invalid(&self, reason: impl Into<String>) -> DaqError {
        DaqError::InvalidRow {
            testid: self.testid(),
            reason: reason.into(),
        }
    }
}

/// An active, validated row.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRow {
    /// Trimmed, and safe to use as a directory name
    pub testid: String,
    /// Transmission or pulse-echo
    pub mode: Mode,
    /// Where the multiplexer should route
    pub channels: ChannelSelection,
    /// Receiver gain, dB
    pub gain_db: f64,
    /// One frequency or a sweep, MHz
    pub frequency: FrequencySpec,
    /// Capture window, µs
    pub window_us: f64,
    /// Capture delay, µs
    pub delay_us: f64,
    /// Passed through to the pulser untouched
    pub filter_mode: String,
    /// The `startdate` cell as written
    pub startdate: String,
    /// `YYYY_MM_DD`, derived from `startdate`
    pub date_fname: String,
    /// The row as read, kept for the log entry
    pub raw: RawRow,
}

impl TestRow {
    /// Driver parameters for one acquisition at `frequency_mhz`.
    pub fn params_at(&self, frequency_mhz: f64) -> AcquisitionParams {
        AcquisitionParams {
            mode: self.mode,
            gain_db: self.gain_db,
            frequency_mhz,
            window_us: self.window_us,
            delay_us: self.delay_us,
            filter_mode: self.filter_mode.clone(),
        }
    }

    /// `TestID_<testid>`
    pub fn test_dir_name(&self) -> String {
        format!("TestID_{}", self.testid)
    }

    /// `<data_dir>/<date_fname>/TestID_<testid>`
    pub fn test_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.date_fname).join(self.test_dir_name())
    }

    /// The object stored in the date log: the raw row plus `date_fname`.
    pub fn log_entry(&self) -> Value {
        let mut entry = self.raw.0.clone();
        entry.insert(
            KEY_DATE_FNAME.to_string(),
            Value::String(self.date_fname.clone()),
        );
        Value::Object(entry)
    }
}

/// Derive the `YYYY_MM_DD` folder name from a start date like
/// `"Oct 16 2026 09:12:44"`. Only the leading `Mon DD YYYY` is read.
pub fn date_fname(startdate: &str) -> Result<String, String> {
    let trimmed = startdate.trim();
    let head = trimmed.get(..11).unwrap_or(trimmed);
    let date = NaiveDate::parse_from_str(head, "%b %d %Y")
        .map_err(|e| format!("startdate '{startdate}' is not 'Mon DD YYYY': {e}"))?;
    Ok(date.format("%Y_%m_%d").to_string())
}

/// True when `name` is exactly one normal path component.
fn is_plain_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

/// Cell as text: strings as-is, numbers in their JSON rendering.
fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Cell as a number: JSON numbers, or strings holding one.
fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        match value {
            Value::Object(map) => RawRow(map),
            _ => unreachable!(),
        }
    }

    fn good_row() -> Value {
        json!({
            "testid": "12",
            "run(y/n)": "y",
            "mode(tr/pe)": "TR",
            "channel": "0,1",
            "channel2": "4,1",
            "gain(db)": "30",
            "freq(mhz)": "2.25",
            "time(us)": 20,
            "delay(us)": "5.5",
            "filtermode": "33",
            "startdate": "Oct 06 2026 09:12:44"
        })
    }

    #[test]
    fn test_date_fname() {
        assert_eq!(date_fname("Oct 16 2026 09:12:44").unwrap(), "2026_10_16");
        assert_eq!(date_fname("Jan 02 2017").unwrap(), "2017_01_02");
        assert!(date_fname("2017-01-02").is_err());
        assert!(date_fname("").is_err());
    }

    #[test]
    fn test_validate_good_row() {
        let test_row = row(good_row()).validate().unwrap();
        assert_eq!(test_row.testid, "12");
        assert_eq!(test_row.mode, Mode::Tr);
        assert_eq!(test_row.channels, ChannelSelection::pair("0,1", "4,1"));
        assert_eq!(test_row.gain_db, 30.0);
        assert_eq!(test_row.window_us, 20.0);
        assert_eq!(test_row.delay_us, 5.5);
        assert_eq!(test_row.frequency, FrequencySpec::Single(2.25));
        assert_eq!(test_row.date_fname, "2026_10_06");
        assert_eq!(test_row.test_dir_name(), "TestID_12");

        let params = test_row.params_at(3.5);
        assert_eq!(params.frequency_mhz, 3.5);
        assert_eq!(params.filter_mode, "33");
    }

    #[test]
    fn test_numeric_testid_and_empty_channel2() {
        let mut value = good_row();
        value["testid"] = json!(7);
        value["channel2"] = json!("");
        let test_row = row(value).validate().unwrap();
        assert_eq!(test_row.testid, "7");
        assert_eq!(test_row.channels, ChannelSelection::single("0,1"));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        for (key, bad) in [
            ("mode(tr/pe)", json!("xx")),
            ("gain(db)", json!("loud")),
            ("freq(mhz)", json!("1,2")),
            ("startdate", json!("yesterday")),
            ("time(us)", json!(0)),
        ] {
            let mut value = good_row();
            value[key] = bad;
            let err = row(value).validate().unwrap_err();
            assert!(
                matches!(err, DaqError::InvalidRow { ref testid, .. } if testid == "12"),
                "{key}: {err}"
            );
        }

        let mut value = good_row();
        value.as_object_mut().unwrap().remove("channel");
        assert!(row(value).validate().is_err());

        for bad_id in ["../../../escaped", "a/b", "..", ".", "a\\b", "/abs"] {
            let mut value = good_row();
            value["testid"] = json!(bad_id);
            let err = row(value).validate().unwrap_err();
            assert!(
                matches!(err, DaqError::InvalidRow { ref reason, .. } if reason.contains("plain name")),
                "{bad_id}: {err}"
            );
        }
    }

    #[test]
    fn test_is_active() {
        let mut value = good_row();
        assert!(row(value.clone()).is_active());
        value["run(y/n)"] = json!("Y");
        assert!(row(value.clone()).is_active());
        value["run(y/n)"] = json!("n");
        assert!(!row(value.clone()).is_active());
        value.as_object_mut().unwrap().remove("run(y/n)");
        assert!(!row(value).is_active());
    }

    #[test]
    fn test_log_entry_carries_date_fname() {
        let test_row = row(good_row()).validate().unwrap();
        let entry = test_row.log_entry();
        assert_eq!(entry["date_fname"], json!("2026_10_06"));
        assert_eq!(entry["testid"], json!("12"));
    }

    #[test]
    fn test_load_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table_state.json");
        let body = json!({"data": [good_row()], "loop_delay": "0.5"}).to_string();
        std::fs::write(&path, body).unwrap();

        let table = RunTable::load(&path).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.loop_delay, Duration::from_millis(500));
        assert_eq!(table.active_rows().count(), 1);
    }

    #[test]
    fn test_load_table_errors_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = RunTable::load(&missing).unwrap_err();
        assert!(err.is_fatal());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{\"data\": [").unwrap();
        assert!(RunTable::load(&bad).unwrap_err().is_fatal());

        let no_delay = dir.path().join("no_delay.json");
        std::fs::write(&no_delay, "{\"data\": []}").unwrap();
        assert!(RunTable::load(&no_delay).unwrap_err().is_fatal());

        let huge_delay = dir.path().join("huge_delay.json");
        std::fs::write(&huge_delay, "{\"data\": [], \"loop_delay\": 1e20}").unwrap();
        let err = RunTable::load(&huge_delay).unwrap_err();
        assert!(matches!(err, DaqError::TableLoad { ref reason, .. } if reason.contains("out of range")));
    }

    #[test]
    fn test_save_raw_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table_state.json");
        assert!(RunTable::save_raw(&path, "not json").is_err());
        assert!(!path.exists());

        let body = json!({"data": [], "loop_delay": 1}).to_string();
        let table = RunTable::save_raw(&path, &body).unwrap();
        assert!(table.rows.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), body);
    }
}
