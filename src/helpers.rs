use crate::myprocess::{AncestorLink, ProcessRecord};

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

///rounds to 2 decimal places, used for every stored memory value
pub fn round2(val: f64) -> f64 {
    (val * 100.).round() / 100.
}

///one glyph per memory percent, 0 is the lowest bar and 100 the highest
pub fn sparkline(percent: f64) -> char {
    let max = (BARS.len() - 1) as f64;
    let index = if percent.is_nan() {
        0.
    } else {
        (percent * max / 100.).floor().clamp(0., max)
    };
    BARS[index as usize]
}

pub fn nice_percent(val: f64) -> String {
    format!("{val:.2}%")
}

///single line description of a process
pub fn format_label(proc: &ProcessRecord) -> String {
    let total = proc.total();
    format!(
        "{:<25}PID: {:<10}owner: {:<12}memory: {} {}",
        proc.name,
        proc.pid,
        proc.owner,
        sparkline(total),
        nice_percent(total)
    )
}

///ancestor chain as `name(pid) mem% > name(pid) mem%`
pub fn format_ancestors(chain: &[AncestorLink]) -> String {
    if chain.is_empty() {
        return "root".to_string();
    }
    chain
        .iter()
        .map(|a| format!("{}({}) {}", a.name, a.pid, nice_percent(a.memory)))
        .collect::<Vec<_>>()
        .join(" > ")
}
