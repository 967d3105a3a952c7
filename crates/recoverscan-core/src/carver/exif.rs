//! EXIF `DateTimeOriginal` scan used to derive a meaningful filename for a
//! freshly carved image when no filesystem metadata survives.

/// Scans `data` (expected to be up to 64 KiB following an image header) for
/// an ASCII substring matching `YYYY:MM:DD HH:MM:SS` and returns its
/// components if found.
pub fn find_date_time_original(data: &[u8]) -> Option<(u32, u32, u32, u32, u32, u32)> {
    const PATTERN_LEN: usize = 19;
    if data.len() < PATTERN_LEN {
        return None;
    }

    for window in data.windows(PATTERN_LEN) {
        if matches_pattern(window) {
            let digit = |i: usize| (window[i] - b'0') as u32;
            let year = digit(0) * 1000 + digit(1) * 100 + digit(2) * 10 + digit(3);
            let month = digit(5) * 10 + digit(6);
            let day = digit(8) * 10 + digit(9);
            let hour = digit(11) * 10 + digit(12);
            let minute = digit(14) * 10 + digit(15);
            let second = digit(17) * 10 + digit(18);
            return Some((year, month, day, hour, minute, second));
        }
    }
    None
}

fn matches_pattern(window: &[u8]) -> bool {
    let is_digit = |b: u8| b.is_ascii_digit();
    window[4] == b':'
        && window[7] == b':'
        && window[10] == b' '
        && window[13] == b':'
        && window[16] == b':'
        && (0..19)
            .filter(|&i| ![4, 7, 10, 13, 16].contains(&i))
            .all(|i| is_digit(window[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_valid_date_time_original() {
        let mut data = vec![0u8; 32];
        data[5..24].copy_from_slice(b"2023:11:04 08:15:42");
        assert_eq!(
            find_date_time_original(&data),
            Some((2023, 11, 4, 8, 15, 42))
        );
    }

    #[test]
    fn rejects_malformed_separators() {
        let data = b"2023-11-04 08:15:42".to_vec();
        assert_eq!(find_date_time_original(&data), None);
    }

    #[test]
    fn no_match_in_short_buffer() {
        assert_eq!(find_date_time_original(b"2023:11"), None);
    }
}
