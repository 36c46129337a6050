//! Columnar serialization of the output tables

use super::Tables;
use crate::error::{Error, Result};
use crate::models::{MatchRecord, Metric, MetricSet, PlayerStatRecord, TeamStatRecord};
use arrow_array::{
    ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray, TimestampMillisecondArray,
    UInt32Array,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const UTC_OFFSET: &str = "+00:00";

/// A table file written to disk
#[derive(Debug, Clone, Serialize)]
pub struct TableFile {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Write all three tables to `dir` as Parquet (and CSV when asked)
pub fn write_tables(dir: &Path, tables: &Tables, with_csv: bool) -> Result<Vec<TableFile>> {
    fs::create_dir_all(dir)?;

    let batches = [
        ("matches", matches_batch(&tables.matches)?),
        ("team_stats", team_stats_batch(&tables.team_stats)?),
        ("player_stats", player_stats_batch(&tables.player_stats)?),
    ];

    let mut files = Vec::new();
    for (name, batch) in batches {
        let path = dir.join(format!("{}.parquet", name));
        write_parquet(&path, &batch)?;
        files.push(TableFile {
            table: name.to_string(),
            path,
            rows: batch.num_rows(),
        });

        if with_csv {
            let path = dir.join(format!("{}.csv", name));
            write_csv(&path, &batch)?;
            files.push(TableFile {
                table: name.to_string(),
                path,
                rows: batch.num_rows(),
            });
        }
        info!("Wrote {} ({} rows)", name, batch.num_rows());
    }

    Ok(files)
}

fn metric_fields() -> Vec<Field> {
    Metric::ALL
        .iter()
        .map(|m| Field::new(m.name(), DataType::Float64, true))
        .collect()
}

fn metric_columns<'a>(sets: impl Iterator<Item = &'a MetricSet> + Clone) -> Vec<ArrayRef> {
    Metric::ALL
        .iter()
        .map(|&m| {
            let values: Vec<Option<f64>> = sets.clone().map(|s| s.get(m)).collect();
            Arc::new(Float64Array::from(values)) as ArrayRef
        })
        .collect()
}

fn strings<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(StringArray::from(values.collect::<Vec<_>>()))
}

fn counts(values: impl Iterator<Item = Option<u32>>) -> ArrayRef {
    Arc::new(UInt32Array::from(values.collect::<Vec<_>>()))
}

pub fn matches_batch(rows: &[MatchRecord]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("match_id", DataType::Utf8, false),
        Field::new("competition_id", DataType::Utf8, false),
        Field::new("competition_name", DataType::Utf8, true),
        Field::new("season_id", DataType::Utf8, false),
        Field::new("season_name", DataType::Utf8, true),
        Field::new("round_number", DataType::UInt32, true),
        Field::new(
            "start_time",
            DataType::Timestamp(TimeUnit::Millisecond, Some(UTC_OFFSET.into())),
            false,
        ),
        Field::new("home_team_id", DataType::Utf8, false),
        Field::new("home_team_name", DataType::Utf8, true),
        Field::new("away_team_id", DataType::Utf8, false),
        Field::new("away_team_name", DataType::Utf8, true),
        Field::new("home_score", DataType::UInt32, true),
        Field::new("away_score", DataType::UInt32, true),
        Field::new("status", DataType::Utf8, true),
        Field::new("match_status", DataType::Utf8, true),
        Field::new("venue_name", DataType::Utf8, true),
        Field::new("venue_city", DataType::Utf8, true),
        Field::new("venue_capacity", DataType::UInt32, true),
        Field::new("attendance", DataType::UInt32, true),
        Field::new("coverage", DataType::Utf8, false),
    ]));

    let start_times = TimestampMillisecondArray::from(
        rows.iter()
            .map(|r| r.date.timestamp_millis())
            .collect::<Vec<_>>(),
    )
    .with_timezone(UTC_OFFSET);

    let columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|r| Some(r.match_id.as_str()))),
        strings(rows.iter().map(|r| Some(r.competition_id.as_str()))),
        strings(rows.iter().map(|r| r.competition_name.as_deref())),
        strings(rows.iter().map(|r| Some(r.season_id.as_str()))),
        strings(rows.iter().map(|r| r.season_name.as_deref())),
        counts(rows.iter().map(|r| r.round_number)),
        Arc::new(start_times),
        strings(rows.iter().map(|r| Some(r.home_team_id.as_str()))),
        strings(rows.iter().map(|r| r.home_team_name.as_deref())),
        strings(rows.iter().map(|r| Some(r.away_team_id.as_str()))),
        strings(rows.iter().map(|r| r.away_team_name.as_deref())),
        counts(rows.iter().map(|r| r.final_score.map(|s| s.home))),
        counts(rows.iter().map(|r| r.final_score.map(|s| s.away))),
        strings(rows.iter().map(|r| r.status.as_deref())),
        strings(rows.iter().map(|r| r.match_status.as_deref())),
        strings(rows.iter().map(|r| r.venue_name.as_deref())),
        strings(rows.iter().map(|r| r.venue_city.as_deref())),
        counts(rows.iter().map(|r| r.venue_capacity)),
        counts(rows.iter().map(|r| r.attendance)),
        strings(rows.iter().map(|r| Some(r.coverage.as_str()))),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

pub fn team_stats_batch(rows: &[TeamStatRecord]) -> Result<RecordBatch> {
    let mut fields = vec![
        Field::new("match_id", DataType::Utf8, false),
        Field::new("team_id", DataType::Utf8, false),
        Field::new("team_name", DataType::Utf8, true),
        Field::new("role", DataType::Utf8, false),
        Field::new("score", DataType::UInt32, true),
        Field::new("origin", DataType::Utf8, false),
    ];
    fields.extend(metric_fields());

    let mut columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|r| Some(r.match_id.as_str()))),
        strings(rows.iter().map(|r| Some(r.team_id.as_str()))),
        strings(rows.iter().map(|r| r.team_name.as_deref())),
        strings(rows.iter().map(|r| Some(r.role.as_str()))),
        counts(rows.iter().map(|r| r.score)),
        strings(rows.iter().map(|r| Some(r.origin.as_str()))),
    ];
    columns.extend(metric_columns(rows.iter().map(|r| &r.metrics)));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

pub fn player_stats_batch(rows: &[PlayerStatRecord]) -> Result<RecordBatch> {
    let mut fields = vec![
        Field::new("match_id", DataType::Utf8, false),
        Field::new("team_id", DataType::Utf8, false),
        Field::new("team_name", DataType::Utf8, true),
        Field::new("player_id", DataType::Utf8, false),
        Field::new("player_name", DataType::Utf8, true),
        Field::new("starter", DataType::Boolean, true),
        Field::new("minutes_played", DataType::UInt32, true),
    ];
    fields.extend(metric_fields());

    let mut columns: Vec<ArrayRef> = vec![
        strings(rows.iter().map(|r| Some(r.match_id.as_str()))),
        strings(rows.iter().map(|r| Some(r.team_id.as_str()))),
        strings(rows.iter().map(|r| r.team_name.as_deref())),
        strings(rows.iter().map(|r| Some(r.player_id.as_str()))),
        strings(rows.iter().map(|r| r.player_name.as_deref())),
        Arc::new(BooleanArray::from(
            rows.iter().map(|r| r.starter).collect::<Vec<_>>(),
        )),
        counts(rows.iter().map(|r| r.minutes_played)),
    ];
    columns.extend(metric_columns(rows.iter().map(|r| &r.metrics)));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Other(format!("Invalid table path {:?}", path)))?;
    Ok(path.with_file_name(format!(".{}.tmp", name)))
}

fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let tmp = temp_path(path)?;
    let file = File::create(&tmp)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_csv(path: &Path, batch: &RecordBatch) -> Result<()> {
    let tmp = temp_path(path)?;
    let file = File::create(&tmp)?;
    let mut writer = arrow_csv::Writer::new(file);
    writer.write(batch)?;
    drop(writer);
    fs::rename(&tmp, path)?;
    Ok(())
}
