use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static SCHEDULE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})-(\d{1,2}):(\d{2})").expect("schedule pattern is valid")
});

/// Start and end of a course's daily class time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Extracts class hours from a free-text schedule such as `"08:00 - 12:30"`.
///
/// Whitespace anywhere in the string is ignored. Anything that does not
/// start with two `H:MM`/`HH:MM` times joined by a dash yields `None`, as does
/// an out-of-range hour or minute.
pub fn parse_schedule(schedule: &str) -> Option<ClassHours> {
    let compact: String = schedule.chars().filter(|c| !c.is_whitespace()).collect();
    let captures = SCHEDULE_PATTERN.captures(&compact)?;

    let field = |idx: usize| captures.get(idx)?.as_str().parse::<u32>().ok();

    let start = NaiveTime::from_hms_opt(field(1)?, field(2)?, 0)?;
    let end = NaiveTime::from_hms_opt(field(3)?, field(4)?, 0)?;

    Some(ClassHours { start, end })
}
