//! Topic filter validation and wildcard matching.
//!
//! Topics and filters are handled as raw UTF-8 bytes so that matching never
//! allocates. Levels are separated by `/`, `+` matches exactly one level and
//! `#` matches any number of trailing levels, including none.

const SEPARATOR: u8 = b'/';
const SINGLE_LEVEL: u8 = b'+';
const MULTI_LEVEL: u8 = b'#';

/// Returns true if `filter` may be used in a SUBSCRIBE.
///
/// `+` must fill a whole level and `#` must fill the last level.
pub fn is_valid_filter(filter: &[u8]) -> bool {
    if filter.is_empty() || filter.contains(&0) {
        return false;
    }
    let mut levels = filter.split(|b| *b == SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        if level.contains(&MULTI_LEVEL) && (level != [MULTI_LEVEL] || levels.peek().is_some()) {
            return false;
        }
        if level.contains(&SINGLE_LEVEL) && level != [SINGLE_LEVEL] {
            return false;
        }
    }
    true
}

/// Returns true if `topic` may be used in a PUBLISH.
pub fn is_valid_topic_name(topic: &[u8]) -> bool {
    !topic.is_empty()
        && !topic
            .iter()
            .any(|b| matches!(*b, SINGLE_LEVEL | MULTI_LEVEL | 0))
}

/// Matches a concrete topic name against a valid filter.
///
/// A single left-to-right scan over both inputs. Topics starting with `$`
/// are not matched by a leading wildcard.
pub fn topic_matches(topic: &[u8], filter: &[u8]) -> bool {
    if topic.first() == Some(&b'$') && matches!(filter.first(), Some(&(SINGLE_LEVEL | MULTI_LEVEL))) {
        return false;
    }

    let mut t = 0;
    let mut f = 0;
    while f < filter.len() {
        match filter[f] {
            MULTI_LEVEL => return true,
            SINGLE_LEVEL => {
                while t < topic.len() && topic[t] != SEPARATOR {
                    t += 1;
                }
                f += 1;
            }
            byte => {
                if t == topic.len() {
                    // "a/b" is the parent level of "a/b/#"
                    return &filter[f..] == b"/#";
                }
                if topic[t] != byte {
                    return false;
                }
                t += 1;
                f += 1;
            }
        }
    }
    t == topic.len()
}

#[cfg(test)]
mod tests;
