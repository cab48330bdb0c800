use std::fmt::Display;

/// An owned UTF-16 string. Class-file names and archive entry names travel
/// through the VM as wide strings; this keeps key comparisons byte-exact
/// even for data that is not valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WString {
    units: Box<[u16]>,
}

impl WString {
    pub fn from_units(units: &[u16]) -> Self {
        WString {
            units: units.into(),
        }
    }

    /// Bytes of unknown encoding (archive entry names) are decoded as UTF-8
    /// with replacement, then widened.
    pub fn from_bytes_lossy(bytes: &[u8]) -> Self {
        let s = String::from_utf8_lossy(bytes);
        WString {
            units: s.encode_utf16().collect(),
        }
    }

    pub fn units(&self) -> &[u16] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl From<&str> for WString {
    fn from(s: &str) -> Self {
        WString {
            units: s.encode_utf16().collect(),
        }
    }
}

impl Display for WString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf16_lossy(&self.units))
    }
}

/// Widens a UTF-8 string into UTF-16 units.
pub fn widen(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_ascii() {
        let w = WString::from("java/lang/Object.class");
        assert_eq!(w.to_string(), "java/lang/Object.class");
        assert_eq!(w.len(), 23);
    }

    #[test]
    fn widen_matches_wstring() {
        assert_eq!(widen("päron"), WString::from("päron").units());
    }
}
