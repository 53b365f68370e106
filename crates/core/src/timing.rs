use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::audit::RunContext;
use crate::domain::registration::{RegistrationId, PRIMARY_KEY};
use crate::store::{write_bytes_atomic, StoreError};

/// Named elapsed-time measurements for one registration, kept in the order
/// they were recorded. Re-recording a key overwrites it in place.
#[derive(Clone, Debug, Default)]
pub struct PhaseTimer {
    samples: Vec<(String, Duration)>,
}

impl PhaseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, elapsed: Duration) {
        let key = key.into();
        match self.samples.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = elapsed,
            None => self.samples.push((key, elapsed)),
        }
    }

    pub fn seconds(&self, key: &str) -> Option<f64> {
        self.samples
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, elapsed)| elapsed.as_secs_f64())
    }

    pub fn format_summary(&self) -> String {
        self.samples
            .iter()
            .map(|(key, elapsed)| format!("{key}={:.3}s", elapsed.as_secs_f64()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Tabular stats file: one row per registration id, one column per timing
/// key, values written with three decimals.
#[derive(Clone, Debug)]
pub struct StatsSink {
    path: PathBuf,
    columns: Vec<String>,
    write_lock: Arc<Mutex<()>>,
    context: RunContext,
}

impl StatsSink {
    /// Creates the file with its header when it does not exist yet.
    pub async fn init(
        path: impl Into<PathBuf>,
        timing_columns: &[String],
        context: RunContext,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let columns: Vec<String> = std::iter::once(PRIMARY_KEY.to_string())
            .chain(timing_columns.iter().cloned())
            .collect();

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io { path: path.clone(), source })?;
        if !exists {
            let header = render(&columns, &[]);
            write_bytes_atomic(&path, header.as_bytes()).await?;
        }

        Ok(Self { path, columns, write_lock: Arc::new(Mutex::new(())), context })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upserts the row for `registration_id`. Existing column order is kept;
    /// columns the file has not seen yet are appended to the header.
    pub async fn record(
        &self,
        registration_id: &RegistrationId,
        values: &[(String, f64)],
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(StoreError::Io { path: self.path.clone(), source }),
        };

        let mut lines = raw.lines().filter(|line| !line.trim().is_empty());
        let mut header = lines.next().map(split_row).unwrap_or_else(|| self.columns.clone());
        let mut rows: Vec<Vec<String>> = lines.map(split_row).collect();

        for column in self.columns.iter().chain(values.iter().map(|(column, _)| column)) {
            if !header.contains(column) {
                header.push(column.clone());
            }
        }
        let key_index = header.iter().position(|column| column == PRIMARY_KEY).unwrap_or(0);

        let row_index =
            match rows.iter().position(|row| row.get(key_index) == Some(&registration_id.0)) {
                Some(index) => index,
                None => {
                    let mut row = vec![String::new(); header.len()];
                    row[key_index] = registration_id.0.clone();
                    rows.push(row);
                    rows.len() - 1
                }
            };

        let row = &mut rows[row_index];
        row.resize(header.len(), String::new());
        for (column, seconds) in values {
            if let Some(index) = header.iter().position(|existing| existing == column) {
                row[index] = format!("{seconds:.3}");
            }
        }

        write_bytes_atomic(&self.path, render(&header, &rows).as_bytes()).await?;
        tracing::debug!(
            event_name = "stats.row_written",
            run_id = %self.context.run_id,
            registration_id = %registration_id,
            path = %self.path.display(),
            "stats row upserted"
        );
        Ok(())
    }
}

fn render(header: &[String], rows: &[Vec<String>]) -> String {
    let mut output = join_row(header);
    output.push('\n');
    for row in rows {
        output.push_str(&join_row(row));
        output.push('\n');
    }
    output
}

fn join_row(cells: &[String]) -> String {
    cells.iter().map(|cell| escape(cell)).collect::<Vec<_>>().join(",")
}

fn escape(cell: &str) -> String {
    if cell.contains(|ch| matches!(ch, ',' | '"' | '\n')) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn split_row(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match (ch, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => cells.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    cells.push(current);
    cells
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{split_row, PhaseTimer, StatsSink};
    use crate::audit::RunContext;
    use crate::domain::registration::RegistrationId;

    fn columns() -> Vec<String> {
        vec!["phase1_seconds".to_string(), "phase2_seconds".to_string()]
    }

    #[tokio::test]
    async fn init_writes_header_once() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("stats.csv");

        StatsSink::init(&path, &columns(), RunContext::new("t")).await.expect("init");
        let header = tokio::fs::read_to_string(&path).await.expect("read");
        assert_eq!(header, "registration_id,phase1_seconds,phase2_seconds\n");

        let sink = StatsSink::init(&path, &columns(), RunContext::new("t")).await.expect("reinit");
        sink.record(&RegistrationId("R1".into()), &[("phase1_seconds".into(), 1.5)])
            .await
            .expect("record");
        StatsSink::init(&path, &columns(), RunContext::new("t")).await.expect("reinit again");
        let body = tokio::fs::read_to_string(&path).await.expect("read");
        assert!(body.contains("R1,1.500,"));
    }

    #[tokio::test]
    async fn rows_are_replaced_by_registration_id() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("stats.csv");
        let sink = StatsSink::init(&path, &columns(), RunContext::new("t")).await.expect("init");
        let id = RegistrationId("R1".into());

        sink.record(&id, &[("phase1_seconds".into(), 1.0)]).await.expect("first");
        sink.record(&RegistrationId("R2".into()), &[("phase1_seconds".into(), 2.0)])
            .await
            .expect("second");
        sink.record(&id, &[("phase1_seconds".into(), 3.25), ("phase2_seconds".into(), 0.1234)])
            .await
            .expect("update");

        let body = tokio::fs::read_to_string(&path).await.expect("read");
        assert_eq!(
            body,
            "registration_id,phase1_seconds,phase2_seconds\nR1,3.250,0.123\nR2,2.000,\n"
        );
    }

    #[tokio::test]
    async fn unknown_columns_are_appended() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("stats.csv");
        let sink = StatsSink::init(&path, &columns(), RunContext::new("t")).await.expect("init");

        sink.record(&RegistrationId("R1".into()), &[("extra_seconds".into(), 0.5)])
            .await
            .expect("record");

        let body = tokio::fs::read_to_string(&path).await.expect("read");
        assert!(body.starts_with("registration_id,phase1_seconds,phase2_seconds,extra_seconds\n"));
        assert!(body.contains("R1,,,0.500"));
    }

    #[test]
    fn quoted_cells_round_trip() {
        assert_eq!(split_row(r#"a,"b,c","d""e""#), vec!["a", "b,c", "d\"e"]);
    }

    #[test]
    fn timer_keeps_recording_order_and_overwrites_keys() {
        let mut timer = PhaseTimer::new();
        timer.record("phase1_negotiation", Duration::from_millis(900));
        timer.record("phase1_file_write", Duration::from_millis(250));
        timer.record("phase1_negotiation", Duration::from_millis(1500));

        assert_eq!(timer.seconds("phase1_negotiation"), Some(1.5));
        assert_eq!(timer.seconds("phase2_negotiation"), None);
        assert_eq!(timer.format_summary(), "phase1_negotiation=1.500s phase1_file_write=0.250s");
    }
}
