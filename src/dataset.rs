use crate::bytes::FixedRecord;
use crate::error::{IndexError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// The raw data file: fixed-width records back to back, no header.
///
/// The index never writes here. It only streams the records during a rebuild.
pub struct DataFile<R> {
    path: PathBuf,
    file: File,
    _record: PhantomData<R>,
}

impl<R: FixedRecord> DataFile<R> {
    /// Opens the data file at `path`, creating it if it does not exist.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            _record: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of whole records in the file.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len() / R::WIDTH as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Appends `record` at the end of the file and returns its byte offset.
    pub fn append(&mut self, record: &R) -> Result<u64> {
        let offset = self.file.seek(SeekFrom::End(0))?;
        let mut buf = vec![0_u8; R::WIDTH];
        record.encode_into(&mut buf);
        self.file.write_all(&buf)?;
        Ok(offset)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Streams every record in the file from the start.
    pub fn records(&self) -> Result<Records<R>> {
        Records::open(&self.path)
    }
}

/// Iterator over the records of a data file.
pub struct Records<R> {
    reader: Option<BufReader<File>>,
    buf: Vec<u8>,
    _record: PhantomData<R>,
}

impl<R: FixedRecord> Records<R> {
    /// A missing file reads as an empty one.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = match File::open(path) {
            Ok(file) => Some(BufReader::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            reader,
            buf: vec![0_u8; R::WIDTH],
            _record: PhantomData,
        })
    }

    fn read_next(&mut self) -> Result<Option<R>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut filled = 0;
        while filled < self.buf.len() {
            match reader.read(&mut self.buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        match filled {
            0 => Ok(None),
            n if n == self.buf.len() => R::decode_from(&self.buf).map(Some),
            n => Err(IndexError::RecordDecode(format!(
                "data file ends with a partial record of {} bytes",
                n
            ))),
        }
    }
}

impl<R: FixedRecord> Iterator for Records<R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                // stop after the first error
                self.reader = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_then_stream() {
        let dir = TempDir::new().unwrap();
        let mut data: DataFile<(u64, u64)> = DataFile::open(dir.path().join("d")).unwrap();
        assert!(data.is_empty().unwrap());
        assert_eq!(data.append(&(1, 10)).unwrap(), 0);
        assert_eq!(data.append(&(2, 20)).unwrap(), 16);
        assert_eq!(data.len().unwrap(), 2);
        let records: Vec<_> = data.records().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut records = Records::<u64>::open(&dir.path().join("nope")).unwrap();
        assert!(records.next().is_none());
    }

    #[test]
    fn partial_tail_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d");
        std::fs::write(&path, [0_u8; 12]).unwrap();
        let results: Vec<_> = Records::<u64>::open(&path).unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(IndexError::RecordDecode(_))));
    }
}
