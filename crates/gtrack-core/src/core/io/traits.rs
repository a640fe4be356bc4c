use nalgebra::Vector3;
use std::error::Error;
use std::io;

/// Destination for exported tracks.
///
/// Each call receives one complete track as an ordered polyline, starting and
/// ending at the free end points of the chain.
pub trait TrackSink {
    /// The error type for write operations.
    type Error: Error + From<io::Error>;

    /// Writes a single track.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying writer fails.
    fn write_track(&mut self, points: &[Vector3<f64>]) -> Result<(), Self::Error>;
}

/// Collects tracks in memory.
#[derive(Debug, Default, Clone)]
pub struct TrackCollector {
    pub tracks: Vec<Vec<Vector3<f64>>>,
}

impl TrackCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackSink for TrackCollector {
    type Error = io::Error;

    fn write_track(&mut self, points: &[Vector3<f64>]) -> Result<(), Self::Error> {
        self.tracks.push(points.to_vec());
        Ok(())
    }
}
