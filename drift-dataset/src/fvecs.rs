//! Reading and writing `.fvecs` files.
//!
//! A file is a plain concatenation of records. Each record is a little
//! endian `i32` dimension followed by that many little endian `f32`s. There
//! is no header, so the dimension is repeated for every vector.

use std::{
    ffi::OsString,
    fs::{self, File},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Write},
    path::{Path, PathBuf},
};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use tracing::{debug, info, warn};

use crate::error::{DatasetError, Result};

const HEADER_SIZE: usize = std::mem::size_of::<i32>();
const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Byte size of a single record of the given dimension.
pub const fn record_byte_size(dimension: usize) -> usize {
    HEADER_SIZE + dimension * FLOAT_SIZE
}

pub struct FvecsWriter<W: Write> {
    writer: W,
    dimension: Option<usize>,
    count: usize,
    buf: Vec<u8>,
}

impl<W: Write> FvecsWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            dimension: None,
            count: 0,
            buf: Vec::new(),
        }
    }

    /// A writer that only accepts vectors of `dimension` floats.
    pub fn with_dimension(writer: W, dimension: usize) -> Self {
        let mut writer = Self::new(writer);
        writer.dimension = Some(dimension);
        writer
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn write_vector(&mut self, vector: &[f32]) -> Result<()> {
        let dimension = *self.dimension.get_or_insert(vector.len());
        if vector.len() != dimension {
            return Err(DatasetError::DimensionMismatch {
                origin: format!("vector {} of output", self.count),
                expected: dimension,
                found: vector.len(),
            });
        }
        if dimension == 0 || dimension > i32::MAX as usize {
            return Err(DatasetError::InvalidConfig(format!(
                "cannot write vectors of dimension {dimension}"
            )));
        }

        self.buf.resize(dimension * FLOAT_SIZE, 0);
        LittleEndian::write_f32_into(vector, &mut self.buf);
        self.writer.write_i32::<LittleEndian>(dimension as i32)?;
        self.writer.write_all(&self.buf)?;
        self.count += 1;

        Ok(())
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Iterates over the records of an `.fvecs` stream, checking that every
/// record has the dimension of the first one.
pub struct FvecsReader<R: Read> {
    reader: R,
    origin: String,
    dimension: Option<usize>,
    index: usize,
    buf: Vec<u8>,
    done: bool,
}

impl FvecsReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), path.display().to_string()))
    }
}

impl<R: Read> FvecsReader<R> {
    pub fn new(reader: R, origin: impl Into<String>) -> Self {
        Self {
            reader,
            origin: origin.into(),
            dimension: None,
            index: 0,
            buf: Vec::new(),
            done: false,
        }
    }

    /// Dimension of the records read so far. `None` before the first record.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn corrupt(&self, reason: impl Into<String>) -> DatasetError {
        DatasetError::CorruptRecord {
            origin: self.origin.clone(),
            index: self.index,
            reason: reason.into(),
        }
    }

    // `Ok(None)` only on a clean end of stream, at a record boundary.
    fn read_header(&mut self) -> Result<Option<usize>> {
        let mut header = [0_u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            HEADER_SIZE => {
                let dimension = LittleEndian::read_i32(&header);
                if dimension <= 0 {
                    Err(self.corrupt(format!("non-positive dimension {dimension}")))
                } else {
                    Ok(Some(dimension as usize))
                }
            }
            _ => Err(self.corrupt("truncated dimension header")),
        }
    }

    fn read_record(&mut self) -> Result<Option<Vec<f32>>> {
        let Some(dimension) = self.read_header()? else {
            return Ok(None);
        };
        match self.dimension {
            Some(expected) if expected != dimension => {
                return Err(DatasetError::DimensionMismatch {
                    origin: format!("{} (record {})", self.origin, self.index),
                    expected,
                    found: dimension,
                });
            }
            _ => self.dimension = Some(dimension),
        }

        // grows with the data actually present, a bogus header cannot force a huge allocation
        let payload_size = dimension * FLOAT_SIZE;
        self.buf.clear();
        self.reader
            .by_ref()
            .take(payload_size as u64)
            .read_to_end(&mut self.buf)?;
        if self.buf.len() < payload_size {
            return Err(self.corrupt("truncated vector payload"));
        }
        let mut vector = vec![0.0_f32; dimension];
        LittleEndian::read_f32_into(&self.buf, &mut vector);
        self.index += 1;

        Ok(Some(vector))
    }
}

impl<R: Read> Iterator for FvecsReader<R> {
    type Item = Result<Vec<f32>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(vector)) => Some(Ok(vector)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Dimension of the first record in the file, or `None` for an empty file.
pub fn peek_dimension<P: AsRef<Path>>(path: P) -> Result<Option<usize>> {
    let mut reader = FvecsReader::open(path)?;
    reader.read_header()
}

/// Counts the records of a file from its length, without reading payloads.
/// Returns the count together with the dimension (`None` when empty).
pub fn count_fvecs<P: AsRef<Path>>(path: P) -> Result<(usize, Option<usize>)> {
    let path = path.as_ref();
    let file_size = fs::metadata(path)?.len() as usize;
    let Some(dimension) = peek_dimension(path)? else {
        return Ok((0, None));
    };
    let record_size = record_byte_size(dimension);
    if file_size % record_size != 0 {
        return Err(DatasetError::CorruptRecord {
            origin: path.display().to_string(),
            index: file_size / record_size,
            reason: format!(
                "file size {file_size} is not a multiple of the record size {record_size}"
            ),
        });
    }

    Ok((file_size / record_size, Some(dimension)))
}

/// Writes all records of `prefix` followed by all records of `suffix` into
/// `output`, replacing whatever was there. Returns the number of records
/// written.
///
/// Both inputs are checked for matching dimensions before the output is
/// touched.
pub fn append_fvecs<P1: AsRef<Path>, P2: AsRef<Path>, P3: AsRef<Path>>(
    suffix: P1,
    prefix: P2,
    output: P3,
) -> Result<usize> {
    let (suffix, prefix, output) = (suffix.as_ref(), prefix.as_ref(), output.as_ref());
    if same_file(output, prefix)? || same_file(output, suffix)? {
        return Err(DatasetError::InvalidConfig(format!(
            "output {output:?} must differ from the files being concatenated"
        )));
    }

    let prefix_dimension = peek_dimension(prefix)?;
    let suffix_dimension = peek_dimension(suffix)?;
    if let (Some(expected), Some(found)) = (prefix_dimension, suffix_dimension) {
        if expected != found {
            return Err(DatasetError::DimensionMismatch {
                origin: format!("{} appended to {}", suffix.display(), prefix.display()),
                expected,
                found,
            });
        }
    }

    info!("appending {suffix:?} after {prefix:?} into {output:?}");
    let partial = partial_path(output);
    let count = match concatenate_into(&partial, &[prefix, suffix]) {
        Ok(count) => count,
        Err(e) => {
            if let Err(remove_error) = fs::remove_file(&partial) {
                warn!("could not remove {partial:?}: {remove_error}");
            }
            return Err(e);
        }
    };
    fs::rename(&partial, output)?;

    Ok(count)
}

fn concatenate_into(output: &Path, inputs: &[&Path]) -> Result<usize> {
    let mut writer = FvecsWriter::new(BufWriter::new(File::create(output)?));
    for path in inputs {
        let before = writer.count();
        for vector in FvecsReader::open(path)? {
            writer.write_vector(&vector?)?;
        }
        debug!("copied {} records from {path:?}", writer.count() - before);
    }
    let count = writer.count();
    writer.finish()?;

    Ok(count)
}

/// Sibling a file is written to before it is renamed into place, so a failed
/// write never leaves a partial file at `path`.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    if a == b {
        return Ok(true);
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => Ok(a == b),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn write_file(path: &Path, vectors: &[Vec<f32>]) {
        let mut writer = FvecsWriter::new(File::create(path).unwrap());
        for v in vectors {
            writer.write_vector(v).unwrap();
        }
        writer.finish().unwrap();
    }

    fn read_all(path: &Path) -> Vec<Vec<f32>> {
        FvecsReader::open(path)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn record_layout_is_dimension_then_floats() {
        let mut writer = FvecsWriter::new(Vec::new());
        writer.write_vector(&[1.0, -2.5]).unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len(), record_byte_size(2));
        assert_eq!(&bytes[0..4], &2_i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1.0_f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(-2.5_f32).to_le_bytes());
    }

    #[test]
    fn writer_rejects_ragged_vectors() {
        let mut writer = FvecsWriter::new(Vec::new());
        writer.write_vector(&[1.0, 2.0, 3.0]).unwrap();
        let err = writer.write_vector(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn reader_rejects_ragged_records() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1_i32.to_le_bytes());
        bytes.extend_from_slice(&1.0_f32.to_le_bytes());
        bytes.extend_from_slice(&2_i32.to_le_bytes());
        bytes.extend_from_slice(&1.0_f32.to_le_bytes());
        bytes.extend_from_slice(&2.0_f32.to_le_bytes());

        let mut reader = FvecsReader::new(Cursor::new(bytes), "ragged");
        assert_eq!(reader.next().unwrap().unwrap(), vec![1.0]);
        assert!(matches!(
            reader.next().unwrap(),
            Err(DatasetError::DimensionMismatch { .. })
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn reader_reports_truncated_payload() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4_i32.to_le_bytes());
        bytes.extend_from_slice(&1.0_f32.to_le_bytes());

        let mut reader = FvecsReader::new(Cursor::new(bytes), "short");
        assert!(matches!(
            reader.next().unwrap(),
            Err(DatasetError::CorruptRecord { index: 0, .. })
        ));
    }

    #[test]
    fn reread_and_rewrite_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.fvecs");
        write_file(
            &original,
            &[vec![0.25, f32::MIN_POSITIVE, -0.0], vec![1e30, -7.5, 3.0]],
        );

        let copy = dir.path().join("copy.fvecs");
        write_file(&copy, &read_all(&original));

        assert_eq!(fs::read(&original).unwrap(), fs::read(&copy).unwrap());
    }

    #[test]
    fn count_uses_file_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("three.fvecs");
        write_file(&path, &[vec![1.0; 5], vec![2.0; 5], vec![3.0; 5]]);
        assert_eq!(count_fvecs(&path).unwrap(), (3, Some(5)));

        let empty = dir.path().join("empty.fvecs");
        File::create(&empty).unwrap();
        assert_eq!(count_fvecs(&empty).unwrap(), (0, None));
    }

    #[test]
    fn append_puts_prefix_first() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("begin.fvecs");
        let suffix = dir.path().join("end.fvecs");
        let output = dir.path().join("all.fvecs");
        let a = vec![vec![1.0, 1.0], vec![2.0, 2.0]];
        let b = vec![vec![3.0, 3.0], vec![4.0, 4.0], vec![5.0, 5.0]];
        write_file(&prefix, &a);
        write_file(&suffix, &b);

        let count = append_fvecs(&suffix, &prefix, &output).unwrap();
        assert_eq!(count, 5);

        let all = read_all(&output);
        assert_eq!(&all[..2], &a[..]);
        assert_eq!(&all[2..], &b[..]);
    }

    #[test]
    fn append_twice_does_not_grow_output() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("begin.fvecs");
        let suffix = dir.path().join("end.fvecs");
        let output = dir.path().join("all.fvecs");
        write_file(&prefix, &[vec![1.0]]);
        write_file(&suffix, &[vec![2.0]]);

        append_fvecs(&suffix, &prefix, &output).unwrap();
        let first = fs::read(&output).unwrap();
        append_fvecs(&suffix, &prefix, &output).unwrap();
        assert_eq!(first, fs::read(&output).unwrap());
    }

    #[test]
    fn append_with_mismatched_dimensions_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("begin.fvecs");
        let suffix = dir.path().join("end.fvecs");
        let output = dir.path().join("all.fvecs");
        write_file(&prefix, &[vec![1.0, 2.0]]);
        write_file(&suffix, &[vec![1.0, 2.0, 3.0]]);

        let err = append_fvecs(&suffix, &prefix, &output).unwrap_err();
        assert!(matches!(
            err,
            DatasetError::DimensionMismatch {
                expected: 2,
                found: 3,
                ..
            }
        ));
        assert!(!output.exists());
    }

    #[test]
    fn append_refuses_to_overwrite_an_input() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("begin.fvecs");
        let suffix = dir.path().join("end.fvecs");
        write_file(&prefix, &[vec![1.0]]);
        write_file(&suffix, &[vec![2.0]]);

        let err = append_fvecs(&suffix, &prefix, &prefix).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidConfig(_)));
        assert_eq!(read_all(&prefix), vec![vec![1.0]]);
    }

    #[test]
    fn failed_append_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("begin.fvecs");
        let suffix = dir.path().join("end.fvecs");
        let output = dir.path().join("all.fvecs");
        write_file(&prefix, &[vec![1.0, 2.0], vec![3.0, 4.0]]);
        write_file(&suffix, &[vec![5.0, 6.0], vec![7.0, 8.0]]);
        let mut bytes = fs::read(&suffix).unwrap();
        bytes.truncate(bytes.len() - 2);
        fs::write(&suffix, bytes).unwrap();

        let err = append_fvecs(&suffix, &prefix, &output).unwrap_err();
        assert!(matches!(err, DatasetError::CorruptRecord { index: 1, .. }));
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[test]
    fn failed_append_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("begin.fvecs");
        let suffix = dir.path().join("end.fvecs");
        let output = dir.path().join("all.fvecs");
        write_file(&prefix, &[vec![1.0]]);
        write_file(&suffix, &[vec![2.0]]);
        append_fvecs(&suffix, &prefix, &output).unwrap();
        let previous = fs::read(&output).unwrap();

        let mut bytes = fs::read(&suffix).unwrap();
        bytes.extend_from_slice(&1_i32.to_le_bytes());
        fs::write(&suffix, bytes).unwrap();

        assert!(append_fvecs(&suffix, &prefix, &output).is_err());
        assert_eq!(previous, fs::read(&output).unwrap());
    }

    #[test]
    fn huge_dimension_header_is_reported_as_truncation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&1.0_f32.to_le_bytes());

        let mut reader = FvecsReader::new(Cursor::new(bytes), "bogus");
        assert!(matches!(
            reader.next().unwrap(),
            Err(DatasetError::CorruptRecord { index: 0, .. })
        ));
        assert!(reader.buf.capacity() < 1 << 20);
    }

    #[test]
    fn partial_path_keeps_the_extension() {
        assert_eq!(
            partial_path(Path::new("out/DPR100KDrift.fvecs")),
            PathBuf::from("out/DPR100KDrift.fvecs.partial")
        );
    }
}
