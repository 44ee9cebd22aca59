//! Instance size ladders used by resize scenarios

/// Size suffixes from smallest to largest
const SIZE_LADDER: &[&str] = &[
    "nano", "micro", "small", "medium", "large", "xlarge", "2xlarge", "4xlarge", "8xlarge",
    "12xlarge", "16xlarge",
];

/// Split `db.m5.large` into (`db.m5`, `large`)
fn split(class: &str) -> Option<(&str, usize)> {
    let (prefix, size) = class.rsplit_once('.')?;
    let index = SIZE_LADDER.iter().position(|s| *s == size)?;
    Some((prefix, index))
}

/// Smallest size a family is offered in
fn min_index(prefix: &str) -> usize {
    let family = prefix.rsplit('.').next().unwrap_or(prefix);
    let managed = prefix.starts_with("db.") || prefix.starts_with("cache.");
    let smallest = match (family.starts_with('t'), managed) {
        (true, false) => "nano",
        (true, true) => "micro",
        (false, _) => "large",
    };
    SIZE_LADDER
        .iter()
        .position(|s| *s == smallest)
        .unwrap_or(0)
}

/// One step down within the same family
pub fn next_smaller(class: &str) -> Option<String> {
    let (prefix, index) = split(class)?;
    if index <= min_index(prefix) {
        return None;
    }
    Some(format!("{}.{}", prefix, SIZE_LADDER[index - 1]))
}

/// Smallest size of the same family, if it differs from `class`
pub fn smallest_in_family(class: &str) -> Option<String> {
    let (prefix, index) = split(class)?;
    let min = min_index(prefix);
    if index <= min {
        return None;
    }
    Some(format!("{}.{}", prefix, SIZE_LADDER[min]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_smaller() {
        assert_eq!(next_smaller("m5.xlarge").as_deref(), Some("m5.large"));
        assert_eq!(next_smaller("t3.micro").as_deref(), Some("t3.nano"));
        assert_eq!(next_smaller("m5.large"), None);
        assert_eq!(next_smaller("t3.nano"), None);
        assert_eq!(next_smaller("weird"), None);
    }

    #[test]
    fn test_smallest_in_family() {
        assert_eq!(
            smallest_in_family("cache.t3.medium").as_deref(),
            Some("cache.t3.micro")
        );
        assert_eq!(
            smallest_in_family("cache.r5.xlarge").as_deref(),
            Some("cache.r5.large")
        );
        assert_eq!(smallest_in_family("cache.t3.micro"), None);
        assert_eq!(smallest_in_family("db.t3.large").as_deref(), Some("db.t3.micro"));
    }
}
