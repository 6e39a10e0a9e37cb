//! Column-oriented parquet tables with a schema chosen at runtime.
//!
//! `ParquetRecordWriter` derives column names from struct fields, which rules out
//! published headers such as `Gene/Compound` or `Match Example`. These tables carry
//! their column names as data instead.

use anyhow::{bail, ensure, Context, Result};
use itertools::Itertools;
use parquet::basic::{Compression, LogicalType, Repetition, Type as PhysicalType, ZstdLevel};
use parquet::column::reader::{ColumnReader, ColumnReaderImpl};
use parquet::data_type::{ByteArray, ByteArrayType, DataType, DoubleType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, RowGroupReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::types::Type;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

/// Values of a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// UTF-8 strings.
    Str(Vec<String>),
    /// 64-bit floats.
    Float64(Vec<f64>),
}

impl ColumnValues {
    /// Number of values in the column.
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Str(v) => v.len(),
            ColumnValues::Float64(v) => v.len(),
        }
    }

    /// True if the column holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn physical_type(&self) -> PhysicalType {
        match self {
            ColumnValues::Str(_) => PhysicalType::BYTE_ARRAY,
            ColumnValues::Float64(_) => PhysicalType::DOUBLE,
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column header as it appears in the file.
    pub name: String,
    /// Column contents.
    pub values: ColumnValues,
}

impl Column {
    /// A string column.
    pub fn str(name: impl Into<String>, values: Vec<String>) -> Self {
        Column {
            name: name.into(),
            values: ColumnValues::Str(values),
        }
    }

    /// A float column.
    pub fn float64(name: impl Into<String>, values: Vec<f64>) -> Self {
        Column {
            name: name.into(),
            values: ColumnValues::Float64(values),
        }
    }
}

/// An ordered set of equally long columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnTable {
    columns: Vec<Column>,
}

impl ColumnTable {
    /// Build a table, checking that names are unique and lengths agree.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(dup) = columns.iter().map(|c| &c.name).duplicates().next() {
            bail!("duplicate column name {dup:?}");
        }
        if let Some((first, rest)) = columns.split_first() {
            for col in rest {
                ensure!(
                    col.values.len() == first.values.len(),
                    "column {:?} has {} rows but column {:?} has {}",
                    col.name,
                    col.values.len(),
                    first.name,
                    first.values.len()
                );
            }
        }
        Ok(ColumnTable { columns })
    }

    /// Columns in file order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in file order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnValues> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.values)
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    fn schema(&self) -> Result<Type> {
        let fields = self
            .columns
            .iter()
            .map(|col| {
                let builder = Type::primitive_type_builder(&col.name, col.values.physical_type())
                    .with_repetition(Repetition::REQUIRED);
                let builder = match col.values {
                    ColumnValues::Str(_) => builder.with_logical_type(Some(LogicalType::String)),
                    ColumnValues::Float64(_) => builder,
                };
                Ok(Arc::new(builder.build()?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Type::group_type_builder("schema")
            .with_fields(fields)
            .build()?)
    }
}

/// Writes a [`ColumnTable`] as a zstd-compressed parquet file.
pub struct TableWriter {
    row_group_size: usize,
    zstd_level: i32,
}

impl Default for TableWriter {
    fn default() -> Self {
        TableWriter {
            // Match tables are a few hundred bytes per row; 1M rows per group stays
            // within a few hundred MB of buffering.
            row_group_size: 1_000_000,
            zstd_level: 3,
        }
    }
}

impl TableWriter {
    /// Instantiate a writer with a row group size.
    pub fn with_row_group_size(row_group_size: usize) -> Self {
        assert!(row_group_size > 0);
        TableWriter {
            row_group_size,
            ..Default::default()
        }
    }

    /// Write `table` to `path`, replacing any existing file.
    pub fn write(&self, table: &ColumnTable, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| path.display().to_string())?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::try_new(self.zstd_level)?))
            .build();
        let schema = Arc::new(table.schema()?);
        let mut writer = SerializedFileWriter::new(BufWriter::new(file), schema, Arc::new(props))?;

        let num_rows = table.num_rows();
        let mut start = 0;
        // An empty table still gets one (empty) row group so the schema is readable.
        loop {
            let end = (start + self.row_group_size).min(num_rows);
            let mut row_group = writer.next_row_group()?;
            for col in table.columns() {
                let mut col_writer = row_group
                    .next_column()?
                    .with_context(|| format!("no column writer for {:?}", col.name))?;
                match &col.values {
                    ColumnValues::Str(values) => {
                        let values = values[start..end]
                            .iter()
                            .map(|s| ByteArray::from(s.as_str()))
                            .collect::<Vec<_>>();
                        col_writer
                            .typed::<ByteArrayType>()
                            .write_batch(&values, None, None)?;
                    }
                    ColumnValues::Float64(values) => {
                        col_writer
                            .typed::<DoubleType>()
                            .write_batch(&values[start..end], None, None)?;
                    }
                }
                col_writer.close()?;
            }
            row_group.close()?;
            start = end;
            if start >= num_rows {
                break;
            }
        }
        writer.close()?;
        Ok(())
    }
}

/// Values of one column chunk, `None` where the file holds a null.
pub(crate) enum Chunk {
    Numbers(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

/// Read the `num_rows` values of a flat column chunk.
pub(crate) fn read_chunk(
    reader: ColumnReader,
    num_rows: usize,
    max_def_level: i16,
) -> Result<Chunk> {
    let n = num_rows;
    let d = max_def_level;
    Ok(match reader {
        ColumnReader::DoubleColumnReader(r) => Chunk::Numbers(read_typed(r, n, d, |x: f64| x)?),
        ColumnReader::FloatColumnReader(r) => Chunk::Numbers(read_typed(r, n, d, f64::from)?),
        ColumnReader::Int32ColumnReader(r) => Chunk::Numbers(read_typed(r, n, d, f64::from)?),
        ColumnReader::Int64ColumnReader(r) => {
            Chunk::Numbers(read_typed(r, n, d, |x: i64| x as f64)?)
        }
        ColumnReader::ByteArrayColumnReader(r) => Chunk::Text(read_typed(r, n, d, |b: ByteArray| {
            String::from_utf8_lossy(b.data()).into_owned()
        })?),
        ColumnReader::BoolColumnReader(r) => {
            Chunk::Text(read_typed(r, n, d, |b: bool| b.to_string())?)
        }
        ColumnReader::Int96ColumnReader(_) | ColumnReader::FixedLenByteArrayColumnReader(_) => {
            bail!("unsupported parquet column type")
        }
    })
}

fn read_typed<T: DataType, U>(
    mut reader: ColumnReaderImpl<T>,
    num_rows: usize,
    max_def_level: i16,
    convert: impl Fn(T::T) -> U,
) -> Result<Vec<Option<U>>> {
    let mut values = Vec::with_capacity(num_rows);
    let mut def_levels = Vec::with_capacity(num_rows);
    let mut read = 0;
    while read < num_rows {
        let levels = (max_def_level > 0).then_some(&mut def_levels);
        let (records, _, _) = reader.read_records(num_rows - read, levels, None, &mut values)?;
        if records == 0 {
            break;
        }
        read += records;
    }
    ensure!(read == num_rows, "column chunk holds {read} of {num_rows} rows");

    let mut values = values.into_iter().map(convert);
    if max_def_level == 0 {
        return Ok(values.map(Some).collect());
    }
    Ok(def_levels
        .iter()
        .map(|&level| if level == max_def_level { values.next() } else { None })
        .collect())
}

/// Read a flat parquet file back into a [`ColumnTable`].
///
/// Byte-array columns become string columns and every numeric column becomes a float
/// column. Nulls and nested columns are rejected.
pub fn read_table(path: &Path) -> Result<ColumnTable> {
    let file = File::open(path).with_context(|| path.display().to_string())?;
    let reader = SerializedFileReader::try_from(file)?;
    let schema = reader.metadata().file_metadata().schema_descr_ptr();
    ensure!(
        schema.root_schema().get_fields().len() == schema.num_columns(),
        "{} has nested columns",
        path.display()
    );

    let mut columns: Vec<Column> = schema
        .columns()
        .iter()
        .map(|desc| match desc.physical_type() {
            PhysicalType::BYTE_ARRAY | PhysicalType::BOOLEAN => {
                Column::str(desc.name(), Vec::new())
            }
            _ => Column::float64(desc.name(), Vec::new()),
        })
        .collect();

    for i in 0..reader.num_row_groups() {
        let row_group = reader.get_row_group(i)?;
        let num_rows = row_group.metadata().num_rows() as usize;
        for (j, col) in columns.iter_mut().enumerate() {
            let max_def_level = schema.column(j).max_def_level();
            let chunk = read_chunk(row_group.get_column_reader(j)?, num_rows, max_def_level)?;
            let nulls = match (&mut col.values, chunk) {
                (ColumnValues::Str(v), Chunk::Text(cells)) => push_present(v, cells),
                (ColumnValues::Float64(v), Chunk::Numbers(cells)) => push_present(v, cells),
                _ => bail!("column {:?} has an unsupported type", col.name),
            };
            ensure!(nulls == 0, "column {:?} holds {nulls} nulls", col.name);
        }
    }
    ColumnTable::new(columns)
}

/// Append the present cells, returning how many were null.
fn push_present<T>(out: &mut Vec<T>, cells: Vec<Option<T>>) -> usize {
    let total = cells.len();
    let before = out.len();
    out.extend(cells.into_iter().flatten());
    total - (out.len() - before)
}
