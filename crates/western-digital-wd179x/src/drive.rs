//! Floppy drive and track-image model.
//!
//! Deliberately independent of any one on-disk image format: a
//! [`FloppyDrive`] is just a set of [`TrackImage`]s indexed by physical
//! cylinder and side, each holding a list of sector records. Parsing a
//! specific container format (`.dsk`, a flat sector dump, etc.) into this
//! shape is the caller's job — the controller only ever needs the sectors
//! on the currently-selected track.

/// A single sector's ID-field data plus its contents.
#[derive(Debug, Clone)]
pub struct Sector {
    /// Cylinder (track) number encoded in the ID field.
    pub c: u8,
    /// Head (side) number encoded in the ID field.
    pub h: u8,
    /// Sector number.
    pub r: u8,
    /// Size code; actual length is `128 << n`.
    pub n: u8,
    pub data: Vec<u8>,
    /// Whether this sector's on-disk CRC is intact. `false` models a
    /// damaged sector the controller detects but still transfers,
    /// per the chip's "CRCERR set, transfer still completes" behaviour.
    pub crc_ok: bool,
}

/// The sectors recorded on one physical track/side.
#[derive(Debug, Clone, Default)]
pub struct TrackImage {
    pub sectors: Vec<Sector>,
}

impl TrackImage {
    #[must_use]
    pub fn find_sector(&self, sector_id: u8) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.r == sector_id)
    }

    /// Concatenation of every sector's data, standing in for a raw
    /// track dump (Read Track doesn't model gap bytes or sync marks).
    #[must_use]
    pub fn raw_dump(&self) -> Vec<u8> {
        self.sectors.iter().flat_map(|s| s.data.iter().copied()).collect()
    }
}

/// A floppy drive: a fixed number of physical tracks (one [`TrackImage`]
/// per side), a write-protect tab, and whether media is inserted.
pub struct FloppyDrive {
    tracks: Vec<[TrackImage; 2]>,
    write_protected: bool,
    inserted: bool,
}

impl FloppyDrive {
    #[must_use]
    pub fn new(track_count: usize) -> Self {
        Self {
            tracks: (0..track_count).map(|_| [TrackImage::default(), TrackImage::default()]).collect(),
            write_protected: false,
            inserted: true,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            tracks: Vec::new(),
            write_protected: false,
            inserted: false,
        }
    }

    pub fn set_track(&mut self, track: u8, side: u8, image: TrackImage) {
        if let Some(t) = self.tracks.get_mut(track as usize) {
            t[(side & 1) as usize] = image;
        }
    }

    #[must_use]
    pub fn track(&self, track: u8, side: u8) -> Option<&TrackImage> {
        if !self.inserted {
            return None;
        }
        self.tracks.get(track as usize).map(|t| &t[(side & 1) as usize])
    }

    pub fn write_sector(&mut self, track: u8, side: u8, sector_id: u8, data: &[u8]) -> bool {
        let Some(t) = self.tracks.get_mut(track as usize) else {
            return false;
        };
        let Some(sector) = t[(side & 1) as usize]
            .sectors
            .iter_mut()
            .find(|s| s.r == sector_id)
        else {
            return false;
        };
        sector.data.clear();
        sector.data.extend_from_slice(data);
        true
    }

    #[must_use]
    pub fn write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Nominal byte length of a track, used only to decide when a
    /// Write Track (format) command has received enough data.
    #[must_use]
    pub fn nominal_track_bytes(&self) -> usize {
        self.tracks
            .first()
            .map_or(6250, |t| t[0].sectors.iter().map(|s| s.data.len()).sum::<usize>().max(6250))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(r: u8) -> Sector {
        Sector { c: 0, h: 0, r, n: 1, data: vec![0u8; 256], crc_ok: true }
    }

    #[test]
    fn find_sector_by_id() {
        let track = TrackImage { sectors: vec![sector(1), sector(2)] };
        assert!(track.find_sector(2).is_some());
        assert!(track.find_sector(9).is_none());
    }

    #[test]
    fn write_sector_replaces_data() {
        let mut drive = FloppyDrive::new(1);
        drive.set_track(0, 0, TrackImage { sectors: vec![sector(1)] });
        assert!(drive.write_sector(0, 0, 1, &[0xFFu8; 256]));
        let data = drive.track(0, 0).unwrap().find_sector(1).unwrap().data.clone();
        assert_eq!(data[0], 0xFF);
    }

    #[test]
    fn write_sector_missing_returns_false() {
        let mut drive = FloppyDrive::new(1);
        drive.set_track(0, 0, TrackImage { sectors: vec![sector(1)] });
        assert!(!drive.write_sector(0, 0, 5, &[0u8; 256]));
    }

    #[test]
    fn empty_drive_has_no_track_data() {
        let drive = FloppyDrive::empty();
        assert!(drive.track(0, 0).is_none());
    }
}
