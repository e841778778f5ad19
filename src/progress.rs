/// Prefix of the lines produced by our `--progress-template`
pub const PROGRESS_PREFIX: &str = "progress:";

/// Parses a `progress: 42.3%` line into a percentage in [0, 100].
pub fn parse_progress_from_line(line: &str) -> Option<f32> {
    let rest = line.trim_start().strip_prefix(PROGRESS_PREFIX)?;
    let number = rest.trim().strip_suffix('%')?;
    let value = number.trim().parse::<f32>().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

/// Keeps the progress reported for one request monotonic.
///
/// yt-dlp restarts at 0% for every stream it fetches (video then audio in
/// MP4 mode), so raw values go backwards; those are dropped here.
#[derive(Debug, Default)]
pub struct ProgressFilter {
    last: Option<f32>,
}

impl ProgressFilter {
    /// Returns the value to publish, or `None` if it would not move forward.
    pub fn accept(&mut self, percent: f32) -> Option<f32> {
        if !percent.is_finite() {
            return None;
        }
        let percent = percent.clamp(0.0, 100.0);
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_template_lines() {
        assert_eq!(parse_progress_from_line("progress: 42.5%"), Some(42.5));
        assert_eq!(parse_progress_from_line("progress:100.0%"), Some(100.0));
        assert_eq!(parse_progress_from_line("  progress:  7%"), Some(7.0));
    }

    #[test]
    fn ignores_other_output() {
        assert_eq!(parse_progress_from_line("progress: N/A"), None);
        assert_eq!(parse_progress_from_line("progress:  Unknown%"), None);
        assert_eq!(parse_progress_from_line("[download] Destination: a.webm"), None);
        assert_eq!(parse_progress_from_line("42%"), None);
    }

    #[test]
    fn clamps_out_of_range_values() {
        assert_eq!(parse_progress_from_line("progress:130%"), Some(100.0));
        assert_eq!(parse_progress_from_line("progress:-4%"), Some(0.0));
    }

    #[test]
    fn filter_drops_regressions() {
        let mut filter = ProgressFilter::default();
        let published: Vec<f32> = [0.0, 12.0, 12.0, 50.0, 3.0, 99.0, f32::NAN, 250.0, 100.0]
            .into_iter()
            .filter_map(|p| filter.accept(p))
            .collect();
        assert_eq!(published, vec![0.0, 12.0, 50.0, 99.0, 100.0]);
    }
}
