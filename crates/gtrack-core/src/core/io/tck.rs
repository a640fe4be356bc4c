//! MRtrix `.tck` track files.
//!
//! A text header terminated by `END` is followed at the byte offset given by its
//! `file: . <offset>` line by little-endian `f32` triplets. Each track ends with a
//! `NaN` triplet and the file ends with an `Inf` triplet.

use super::traits::TrackSink;
use nalgebra::Vector3;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

const MAGIC: &str = "mrtrix tracks";

#[derive(Debug, Error)]
pub enum TckError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Not a track file: {0}")]
    Format(String),
}

/// Streams tracks into a `.tck` file; the track count is patched in by [`TckWriter::finish`].
pub struct TckWriter<W: Write + Seek> {
    inner: W,
    properties: Vec<(String, String)>,
    count: u64,
}

impl TckWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self, TckError> {
        Self::new(BufWriter::new(File::create(path)?), Vec::new())
    }

    pub fn create_with_properties(
        path: &Path,
        properties: Vec<(String, String)>,
    ) -> Result<Self, TckError> {
        Self::new(BufWriter::new(File::create(path)?), properties)
    }
}

impl<W: Write + Seek> TckWriter<W> {
    pub fn new(mut inner: W, properties: Vec<(String, String)>) -> Result<Self, TckError> {
        inner.write_all(render_header(&properties, 0).as_bytes())?;
        Ok(Self {
            inner,
            properties,
            count: 0,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Writes the terminator, rewrites the header with the final count and returns the writer.
    pub fn finish(mut self) -> Result<W, TckError> {
        write_triplet(&mut self.inner, f32::INFINITY)?;
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner
            .write_all(render_header(&self.properties, self.count).as_bytes())?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> TrackSink for TckWriter<W> {
    type Error = TckError;

    fn write_track(&mut self, points: &[Vector3<f64>]) -> Result<(), Self::Error> {
        for p in points {
            for value in [p.x, p.y, p.z] {
                self.inner.write_all(&(value as f32).to_le_bytes())?;
            }
        }
        write_triplet(&mut self.inner, f32::NAN)?;
        self.count += 1;
        Ok(())
    }
}

fn write_triplet(w: &mut impl Write, value: f32) -> io::Result<()> {
    for _ in 0..3 {
        w.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Renders the header; the count is zero-padded so that patching it keeps the length.
fn render_header(properties: &[(String, String)], count: u64) -> String {
    let body = |offset: usize| {
        let mut h = format!("{MAGIC}\n");
        for (key, value) in properties {
            h.push_str(&format!("{key}: {value}\n"));
        }
        h.push_str("datatype: Float32LE\n");
        h.push_str(&format!("count: {count:020}\n"));
        h.push_str(&format!("file: . {offset}\nEND\n"));
        h
    };

    let mut offset = 0;
    loop {
        let header = body(offset);
        if header.len() == offset {
            return header;
        }
        offset = header.len();
    }
}

/// Reads every track of a `.tck` stream.
pub fn read_tracks(reader: impl Read) -> Result<Vec<Vec<Vector3<f32>>>, TckError> {
    let mut reader = BufReader::new(reader);
    let mut consumed = 0usize;
    let mut offset = None;
    let mut line = String::new();

    reader.read_line(&mut line)?;
    consumed += line.len();
    if line.trim_end() != MAGIC {
        return Err(TckError::Format(format!("unexpected magic '{}'", line.trim_end())));
    }
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(TckError::Format("header is not terminated by END".into()));
        }
        consumed += line.len();
        let trimmed = line.trim_end();
        if trimmed == "END" {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("file: . ") {
            offset = rest.trim().parse::<usize>().ok();
        }
    }

    let offset = offset.ok_or_else(|| TckError::Format("missing 'file' entry".into()))?;
    if offset < consumed {
        return Err(TckError::Format("data offset lies inside the header".into()));
    }
    io::copy(&mut (&mut reader).take((offset - consumed) as u64), &mut io::sink())?;

    let mut tracks = Vec::new();
    let mut current = Vec::new();
    let mut buf = [0u8; 12];
    loop {
        reader.read_exact(&mut buf)?;
        let v = [0, 4, 8].map(|i| f32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]));
        if v[0].is_infinite() {
            break;
        }
        if v[0].is_nan() {
            tracks.push(std::mem::take(&mut current));
        } else {
            current.push(Vector3::new(v[0], v[1], v[2]));
        }
    }
    Ok(tracks)
}
