//! Section-tagged binary model reader.
//!
//! Model files are sequences of tagged sections. The HCLG section uses a
//! 32-byte zero-padded ASCII tag; the tensor and network sections (`VEC0`,
//! `MAT0`, `NN02`, `LAY0`) use exact-length tags. All integers and floats
//! are little-endian.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};

use crate::error::{Error, Result};

/// Buffered reader over a model file that keeps the file name around so
/// every error can say which file was bad.
pub struct BinaryReader<R: Read> {
    reader: R,
    path: PathBuf,
}

impl BinaryReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Ok(BinaryReader {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
        })
    }
}

impl<R: Read> BinaryReader<R> {
    /// Wrap an arbitrary reader; `name` stands in for the file name in
    /// error messages.
    pub fn from_reader(reader: R, name: &str) -> Self {
        BinaryReader {
            reader,
            path: PathBuf::from(name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact(buf)
            .map_err(|e| Error::io(&self.path, e))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_f32_slice(&mut self, len: usize) -> Result<Vec<f32>> {
        let mut bytes = vec![0u8; len * 4];
        self.read_bytes(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    pub fn read_i32_slice(&mut self, len: usize) -> Result<Vec<i32>> {
        let mut bytes = vec![0u8; len * 4];
        self.read_bytes(&mut bytes)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Read an exact-length ASCII tag and verify it.
    pub fn expect_tag(&mut self, tag: &str) -> Result<()> {
        let mut buf = vec![0u8; tag.len()];
        self.read_bytes(&mut buf)?;
        if buf != tag.as_bytes() {
            return Err(Error::corruption(
                &self.path,
                format!(
                    "section tag '{}' expected, '{}' found",
                    tag,
                    String::from_utf8_lossy(&buf)
                ),
            ));
        }
        Ok(())
    }

    /// Read a 32-byte zero-padded ASCII tag and verify it.
    pub fn expect_padded_tag(&mut self, tag: &str) -> Result<()> {
        let mut buf = [0u8; 32];
        self.read_bytes(&mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if &buf[..end] != tag.as_bytes() {
            return Err(Error::corruption(
                &self.path,
                format!(
                    "section tag '{}' expected, '{}' found",
                    tag,
                    String::from_utf8_lossy(&buf[..end])
                ),
            ));
        }
        Ok(())
    }

    fn read_vec_header(&mut self, elem_size: usize) -> Result<usize> {
        self.expect_tag("VEC0")?;
        let section_size = self.read_i32()?;
        let dim = self.read_i32()?;
        if dim < 0 || dim as i64 * elem_size as i64 + 4 != section_size as i64 {
            return Err(Error::corruption(
                &self.path,
                format!(
                    "vector section size {} does not match dim {}",
                    section_size, dim
                ),
            ));
        }
        Ok(dim as usize)
    }

    /// Read a `VEC0` section of f32 values.
    pub fn read_f32_vector(&mut self) -> Result<Array1<f32>> {
        let dim = self.read_vec_header(4)?;
        Ok(Array1::from_vec(self.read_f32_slice(dim)?))
    }

    /// Read a `VEC0` section of i32 values.
    pub fn read_i32_vector(&mut self) -> Result<Vec<i32>> {
        let dim = self.read_vec_header(4)?;
        self.read_i32_slice(dim)
    }

    /// Read a `MAT0` section: rows and cols, then one nested `VEC0` per row.
    pub fn read_matrix(&mut self) -> Result<Array2<f32>> {
        self.expect_tag("MAT0")?;
        let _section_size = self.read_i32()?;
        let rows = self.read_i32()?;
        let cols = self.read_i32()?;
        if rows < 0 || cols < 0 {
            return Err(Error::corruption(
                &self.path,
                format!("matrix shape {}x{}", rows, cols),
            ));
        }
        let (rows, cols) = (rows as usize, cols as usize);

        let mut data = Vec::with_capacity(rows * cols);
        for _ in 0..rows {
            let row = self.read_f32_vector()?;
            if row.len() != cols {
                return Err(Error::corruption(
                    &self.path,
                    format!("matrix row of {} values, {} expected", row.len(), cols),
                ));
            }
            data.extend(row.iter());
        }
        Array2::from_shape_vec((rows, cols), data)
            .map_err(|e| Error::corruption(&self.path, e.to_string()))
    }
}
