// Report selection by begin-time window

use super::TypedValue;

/// Reports whose begin time lies in `[start, end]`
///
/// Chunks are skipped whole when their first report begins after `end` or
/// their last report begins before `start`.
///
/// # Panics
///
/// Panics if a chunk is not a whole number of reports or a begin-time value
/// is not a 64-bit integer.
pub fn select_reports<'a>(
    chunks: &[&'a [TypedValue]],
    report_size: usize,
    time_index: usize,
    start: u64,
    end: u64,
) -> Vec<&'a [TypedValue]> {
    assert!(report_size > 0, "report size must be non-zero");
    assert!(time_index < report_size, "time column outside of report");
    assert!(start <= end, "window {}..{} is reversed", start, end);

    let mut selected = Vec::new();
    for &chunk in chunks {
        assert_eq!(
            chunk.len() % report_size,
            0,
            "report chunk is not a whole number of reports"
        );
        if chunk.is_empty() {
            continue;
        }

        let first = report_time(&chunk[..report_size], time_index);
        if first > end {
            continue;
        }
        let last = report_time(&chunk[chunk.len() - report_size..], time_index);
        if last < start {
            continue;
        }

        selected.extend(chunk.chunks_exact(report_size).filter(|report| {
            let time = report_time(report, time_index);
            time >= start && time <= end
        }));
    }
    selected
}

fn report_time(report: &[TypedValue], time_index: usize) -> u64 {
    report[time_index]
        .as_u64()
        .unwrap_or_else(|| panic!("report time must be u64, got {:?}", report[time_index]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(times: &[u64]) -> Vec<TypedValue> {
        times
            .iter()
            .flat_map(|&t| [TypedValue::U64(t), TypedValue::U32(t as u32)])
            .collect()
    }

    #[test]
    fn test_select_inclusive_bounds() {
        let c = chunk(&[10, 20, 30, 40]);
        let selected = select_reports(&[c.as_slice()], 2, 0, 20, 30);
        let times: Vec<u64> = selected.iter().map(|r| r[0].as_u64().unwrap()).collect();
        assert_eq!(times, vec![20, 30]);
    }

    #[test]
    fn test_select_skips_disjoint_chunks() {
        let early = chunk(&[1, 2]);
        let middle = chunk(&[15, 25]);
        let late = chunk(&[100, 200]);
        let selected = select_reports(
            &[early.as_slice(), middle.as_slice(), late.as_slice()],
            2,
            0,
            10,
            50,
        );
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_select_across_chunks() {
        let a = chunk(&[5, 12]);
        let b = chunk(&[18, 60]);
        let selected = select_reports(&[a.as_slice(), b.as_slice()], 2, 0, 10, 20);
        let times: Vec<u64> = selected.iter().map(|r| r[0].as_u64().unwrap()).collect();
        assert_eq!(times, vec![12, 18]);
    }

    #[test]
    #[should_panic(expected = "report time must be u64")]
    fn test_select_rejects_non_u64_time() {
        let c = chunk(&[10]);
        select_reports(&[c.as_slice()], 2, 1, 0, 100);
    }
}
