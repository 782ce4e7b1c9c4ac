use crate::StoreError;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// How samples falling in the same resampling bucket are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Arithmetic mean, used for analog points.
    Mean,
    /// Last sample wins, used for binary and multi-state points.
    Last,
}

/// One column of a [`HistoryFrame`], aligned with the frame index.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Numeric(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v) => v.len(),
            Self::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Numeric(_))
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(v) => Self::Numeric(rows.iter().map(|i| v[*i]).collect()),
            Self::Text(v) => Self::Text(rows.iter().map(|i| v[*i].clone()).collect()),
        }
    }

    fn fill(&mut self) {
        match self {
            Self::Numeric(v) => fill_gaps(v),
            Self::Text(v) => fill_gaps(v),
        }
    }
}

/// Forward-fill then back-fill `None` cells.
fn fill_gaps<T: Clone>(cells: &mut [Option<T>]) {
    let mut carry: Option<T> = None;
    for cell in cells.iter_mut() {
        match cell {
            Some(v) => carry = Some(v.clone()),
            None => *cell = carry.clone(),
        }
    }
    let mut carry: Option<T> = None;
    for cell in cells.iter_mut().rev() {
        match cell {
            Some(v) => carry = Some(v.clone()),
            None => *cell = carry.clone(),
        }
    }
}

/// A table of point histories keyed by UTC timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFrame {
    index: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Column>,
}

impl HistoryFrame {
    /// Builds a frame from an ascending index and columns of the same length.
    /// Columns whose length differs from the index are dropped.
    pub fn new(index: Vec<DateTime<Utc>>, columns: BTreeMap<String, Column>) -> Self {
        let rows = index.len();
        let columns = columns
            .into_iter()
            .filter(|(name, col)| {
                if col.len() == rows {
                    true
                } else {
                    log::warn!("dropping column {name}: {} cells for {rows} rows", col.len());
                    false
                }
            })
            .collect();
        Self { index, columns }
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// A frame with no rows or no columns carries nothing worth storing.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty() || self.columns.is_empty()
    }

    /// Rows strictly after `ts`.
    pub fn after(&self, ts: DateTime<Utc>) -> Self {
        let rows: Vec<usize> = (0..self.index.len())
            .filter(|i| self.index[*i] > ts)
            .collect();
        Self {
            index: rows.iter().map(|i| self.index[*i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.select(&rows)))
                .collect(),
        }
    }

    /// Last non-null value of a numeric column.
    pub fn last_number(&self, name: &str) -> Option<f64> {
        match self.columns.get(name)? {
            Column::Numeric(v) => v.iter().rev().find_map(|c| *c),
            Column::Text(_) => None,
        }
    }

    /// Last non-null value of a text column.
    pub fn last_text(&self, name: &str) -> Option<&str> {
        match self.columns.get(name)? {
            Column::Text(v) => v.iter().rev().find_map(|c| c.as_deref()),
            Column::Numeric(_) => None,
        }
    }

    /// Non-null samples of a numeric column.
    pub fn numeric_series(&self, name: &str) -> Vec<(DateTime<Utc>, f64)> {
        match self.columns.get(name) {
            Some(Column::Numeric(v)) => self
                .index
                .iter()
                .zip(v)
                .filter_map(|(ts, c)| c.map(|c| (*ts, c)))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum Series {
    Numeric(Vec<(DateTime<Utc>, f64)>, Aggregation),
    Text(Vec<(DateTime<Utc>, String)>),
}

impl Series {
    fn timestamps(&self) -> Box<dyn Iterator<Item = DateTime<Utc>> + '_> {
        match self {
            Self::Numeric(s, _) => Box::new(s.iter().map(|(ts, _)| *ts)),
            Self::Text(s) => Box::new(s.iter().map(|(ts, _)| *ts)),
        }
    }
}

/// Collects per-point series and aligns them into a [`HistoryFrame`].
#[derive(Debug, Clone, Default)]
pub struct FrameBuilder {
    series: Vec<(String, Series)>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn numeric(
        &mut self,
        name: impl Into<String>,
        samples: impl IntoIterator<Item = (DateTime<Utc>, f64)>,
        aggregation: Aggregation,
    ) -> &mut Self {
        self.series.push((
            name.into(),
            Series::Numeric(samples.into_iter().collect(), aggregation),
        ));
        self
    }

    pub fn text(
        &mut self,
        name: impl Into<String>,
        samples: impl IntoIterator<Item = (DateTime<Utc>, String)>,
    ) -> &mut Self {
        self.series
            .push((name.into(), Series::Text(samples.into_iter().collect())));
        self
    }

    /// Aligns every series on a common index.
    ///
    /// With `resample`, the index is a regular grid of that step from the
    /// first to the last sample, buckets are aggregated per column, and gaps
    /// are forward-filled then back-filled. Without it, the index is the
    /// union of all sample timestamps and gaps stay empty.
    pub fn build(&self, resample: Option<Duration>) -> HistoryFrame {
        match resample {
            Some(step) => self.build_resampled(step),
            None => self.build_raw(),
        }
    }

    fn build_raw(&self) -> HistoryFrame {
        let mut index: Vec<DateTime<Utc>> = self
            .series
            .iter()
            .flat_map(|(_, s)| s.timestamps())
            .collect();
        index.sort();
        index.dedup();

        let slot = |ts: &DateTime<Utc>| index.binary_search(ts).ok();
        let mut columns = BTreeMap::new();
        for (name, series) in &self.series {
            let column = match series {
                Series::Numeric(samples, _) => {
                    let mut cells = vec![None; index.len()];
                    for (ts, v) in samples {
                        if let Some(i) = slot(ts) {
                            cells[i] = Some(*v);
                        }
                    }
                    Column::Numeric(cells)
                }
                Series::Text(samples) => {
                    let mut cells = vec![None; index.len()];
                    for (ts, v) in samples {
                        if let Some(i) = slot(ts) {
                            cells[i] = Some(v.clone());
                        }
                    }
                    Column::Text(cells)
                }
            };
            columns.insert(name.clone(), column);
        }
        HistoryFrame { index, columns }
    }

    fn build_resampled(&self, step: Duration) -> HistoryFrame {
        let step_ms = step.num_milliseconds().max(1);
        let bucket = |ts: &DateTime<Utc>| ts.timestamp_millis().div_euclid(step_ms);

        let Some(first) = self
            .series
            .iter()
            .flat_map(|(_, s)| s.timestamps())
            .map(|ts| bucket(&ts))
            .min()
        else {
            return HistoryFrame::default();
        };
        let last = self
            .series
            .iter()
            .flat_map(|(_, s)| s.timestamps())
            .map(|ts| bucket(&ts))
            .max()
            .unwrap_or(first);

        let index: Vec<DateTime<Utc>> = (first..=last)
            .filter_map(|b| DateTime::from_timestamp_millis(b * step_ms))
            .collect();
        let rows = index.len();
        let slot = |ts: &DateTime<Utc>| usize::try_from(bucket(ts) - first).ok();

        let mut columns = BTreeMap::new();
        for (name, series) in &self.series {
            let mut column = match series {
                Series::Numeric(samples, Aggregation::Mean) => {
                    let mut sums = vec![(0.0f64, 0u32); rows];
                    for (ts, v) in samples {
                        if let Some(cell) = slot(ts).and_then(|i| sums.get_mut(i)) {
                            cell.0 += v;
                            cell.1 += 1;
                        }
                    }
                    Column::Numeric(
                        sums.into_iter()
                            .map(|(sum, n)| (n > 0).then(|| sum / f64::from(n)))
                            .collect(),
                    )
                }
                Series::Numeric(samples, Aggregation::Last) => {
                    let mut cells = vec![None; rows];
                    for (ts, v) in samples {
                        if let Some(cell) = slot(ts).and_then(|i| cells.get_mut(i)) {
                            *cell = Some(*v);
                        }
                    }
                    Column::Numeric(cells)
                }
                Series::Text(samples) => {
                    let mut cells = vec![None; rows];
                    for (ts, v) in samples {
                        if let Some(cell) = slot(ts).and_then(|i| cells.get_mut(i)) {
                            *cell = Some(v.clone());
                        }
                    }
                    Column::Text(cells)
                }
            };
            column.fill();
            columns.insert(name.clone(), column);
        }
        HistoryFrame { index, columns }
    }
}

/// Parses a resampling frequency such as `1s`, `500ms`, `5min`, `1h` or `1d`.
pub fn parse_frequency(text: &str) -> Result<Duration, StoreError> {
    let bad = || StoreError::BadFrequency(text.to_string());
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    let n: i64 = if digits.is_empty() {
        1
    } else {
        digits.parse().map_err(|_| bad())?
    };
    let step = match unit.to_ascii_lowercase().as_str() {
        "ms" | "l" => Duration::milliseconds(n),
        "s" | "" => Duration::seconds(n),
        "min" | "t" | "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        _ => return Err(bad()),
    };
    if step <= Duration::zero() {
        return Err(bad());
    }
    Ok(step)
}
