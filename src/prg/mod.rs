//! PRG string: parse/validate the linearised population reference graph
//! and expose the end-position map of every even (site-exit) marker.

use std::collections::HashMap;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::encoding::{is_site_entry, is_variant_marker, Marker};
use crate::errors::{GramError, GramResult};

/// A validated, linearised PRG: bases interleaved with variant markers,
/// plus the position of the final occurrence of each even marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrgString {
    linear_prg: Vec<Marker>,
    end_positions: HashMap<Marker, usize>,
}

impl PrgString {
    /// Builds and validates a PRG string from its raw marker sequence.
    /// Rejects any even marker whose matching odd predecessor never
    /// occurred earlier in the sequence.
    pub fn new(markers: Vec<Marker>) -> GramResult<Self> {
        let mut seen_entries: HashMap<Marker, bool> = HashMap::new();
        let mut end_positions: HashMap<Marker, usize> = HashMap::new();

        for (pos, &m) in markers.iter().enumerate() {
            if !is_variant_marker(m) {
                continue;
            }
            if is_site_entry(m) {
                seen_entries.insert(m, true);
            } else {
                let entry = m - 1;
                if !seen_entries.contains_key(&entry) {
                    return Err(GramError::MalformedPrg(format!(
                        "even marker {} at position {} has no matching odd entry marker {}",
                        m, pos, entry
                    )));
                }
                end_positions.insert(m, pos);
            }
        }

        Ok(PrgString {
            linear_prg: markers,
            end_positions,
        })
    }

    /// Reads a PRG file of little-endian u32 symbols, one per marker.
    pub fn from_marker_file(path: &Path) -> GramResult<Self> {
        let bytes = std::fs::read(path).map_err(|source| GramError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut cursor = std::io::Cursor::new(bytes);
        let mut markers = Vec::new();
        loop {
            match cursor.read_u32::<LittleEndian>() {
                Ok(m) => markers.push(m),
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(source) => {
                    return Err(GramError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
        Self::new(markers)
    }

    pub fn as_slice(&self) -> &[Marker] {
        &self.linear_prg
    }

    pub fn len(&self) -> usize {
        self.linear_prg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.linear_prg.is_empty()
    }

    pub fn end_positions(&self) -> &HashMap<Marker, usize> {
        &self.end_positions
    }

    pub fn end_position_of(&self, even_marker: Marker) -> Option<usize> {
        self.end_positions.get(&even_marker).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_single_bubble() {
        // A 5 C 6 G 6 T 6 A  -- site 5 with alleles C, G, T
        let markers = vec![1, 5, 2, 6, 3, 6, 4, 6, 1];
        let prg = PrgString::new(markers).unwrap();
        assert_eq!(prg.end_position_of(6), Some(7));
    }

    #[test]
    fn rejects_even_marker_without_odd_predecessor() {
        let markers = vec![1, 6, 2, 5];
        let err = PrgString::new(markers).unwrap_err();
        assert!(matches!(err, GramError::MalformedPrg(_)));
    }
}
