//! Typed, user-scoped, lexically-ordered identifiers.
//!
//! An [`Id`] is a tagged string `<type>,<user><sequence>` where `<type>`
//! selects an [`IdType`], `<user>` is an arbitrary (possibly empty)
//! user-scope string, and `<sequence>` is a pronounceable letter pattern
//! (alternating consonants and vowels, starting with a consonant) that
//! admits a total successor function. Grounded in
//! `examples/original_source/ids.py`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const INITIAL_CONSONANTS: &str = "bcdfghjklmnprstvwyz";
const CONSONANTS: &str = "bcdfghjklmnprstvwxyz";
const VOWELS: &str = "aeiou";
const SEPARATOR: char = ',';

/// The kind of entity an [`Id`] names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdType {
    Record,
    Version,
    Branch,
    View,
}

impl IdType {
    fn letter(self) -> char {
        match self {
            IdType::Record => 'r',
            IdType::Version => 'v',
            IdType::Branch => 'b',
            IdType::View => 'w',
        }
    }

    fn from_letter(c: char) -> Option<IdType> {
        match c {
            'r' => Some(IdType::Record),
            'v' => Some(IdType::Version),
            'b' => Some(IdType::Branch),
            'w' => Some(IdType::View),
            _ => None,
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdType::Record => "record",
            IdType::Version => "version",
            IdType::Branch => "branch",
            IdType::View => "view",
        };
        write!(f, "{name}")
    }
}

/// A parsed, typed identifier. Cheap to clone and hash; compares and
/// orders lexically on its canonical string form, which is what gives
/// the ID space its "lexically ordered" property for a fixed sequence
/// length.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// The sentinel root version id, `v,ROOT`.
    pub fn root_version() -> Id {
        Id("v,ROOT".to_string())
    }

    /// The sentinel trunk branch id, `b,TRUNK`.
    pub fn trunk_branch() -> Id {
        Id("b,TRUNK".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a raw string into an `Id`, failing with [`Error::InvalidId`]
    /// if it doesn't match the grammar.
    pub fn parse(raw: &str) -> Result<Id> {
        let (_, _, _) = decompose_id(raw)?;
        Ok(Id(raw.to_string()))
    }

    pub fn id_type(&self) -> Option<IdType> {
        decompose_id(&self.0).ok().map(|(t, _, _)| t).flatten()
    }

    /// Builds an id from its parts. `id_type` of `None` composes an
    /// untyped id (used nowhere in the public API but kept for symmetry
    /// with `decompose_id`, which can return `None` for an untyped id).
    pub fn compose(id_type: Option<IdType>, user: &str, sequence: &str) -> Id {
        Id(compose_id(id_type, user, sequence))
    }

    pub fn decompose(&self) -> Result<(Option<IdType>, String, String)> {
        decompose_id(&self.0)
    }

    /// Returns the next id in sequence for the same type and user.
    pub fn next(&self) -> Result<Id> {
        let (id_type, user, sequence) = self.decompose()?;
        Ok(Id(compose_id(id_type, &user, &next_sequence(&sequence))))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:?})", self.0)
    }
}

fn compose_id(id_type: Option<IdType>, user: &str, sequence: &str) -> String {
    let type_str = id_type.map(|t| t.letter().to_string()).unwrap_or_default();
    format!("{type_str}{SEPARATOR}{user}{sequence}")
}

fn decompose_id(id: &str) -> Result<(Option<IdType>, String, String)> {
    if id == "v,ROOT" {
        return Ok((Some(IdType::Version), String::new(), "ROOT".to_string()));
    }
    if id == "b,TRUNK" {
        return Ok((Some(IdType::Branch), String::new(), "TRUNK".to_string()));
    }

    let mut chars = id.chars();
    let first = chars.next().ok_or_else(|| Error::InvalidId(id.to_string()))?;

    let (id_type, rest) = if first == SEPARATOR {
        (None, &id[first.len_utf8()..])
    } else {
        let id_type =
            IdType::from_letter(first).ok_or_else(|| Error::InvalidId(id.to_string()))?;
        let after_type = &id[first.len_utf8()..];
        let sep = after_type
            .chars()
            .next()
            .filter(|c| *c == SEPARATOR)
            .ok_or_else(|| Error::InvalidId(id.to_string()))?;
        (Some(id_type), &after_type[sep.len_utf8()..])
    };

    // Greedily find the longest pronounceable suffix of `rest`; whatever
    // precedes it is the user scope.
    let rest_chars: Vec<char> = rest.chars().collect();
    for start in 0..rest_chars.len() {
        let candidate: String = rest_chars[start..].iter().collect();
        if is_pronounceable_sequence(&candidate) {
            let user: String = rest_chars[..start].iter().collect();
            return Ok((id_type, user, candidate));
        }
    }

    Err(Error::InvalidId(id.to_string()))
}

fn char_choices_for_position(position: usize) -> &'static str {
    if position == 0 {
        INITIAL_CONSONANTS
    } else if position % 2 == 1 {
        VOWELS
    } else {
        CONSONANTS
    }
}

fn is_pronounceable_sequence(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.chars()
        .enumerate()
        .all(|(i, c)| char_choices_for_position(i).contains(c))
}

/// The odometer: increments a pronounceable sequence, carrying into a new
/// trailing character (preserving the consonant/vowel alternation) when
/// every position overflows.
pub(crate) fn next_sequence(sequence: &str) -> String {
    let mut chars: Vec<char> = sequence.chars().collect();
    let mut i = chars.len() as isize - 1;

    while i >= 0 {
        let idx = i as usize;
        let choices = char_choices_for_position(idx);
        let pos = choices.find(chars[idx]).expect("valid pronounceable char");
        if pos + 1 == choices.chars().count() {
            chars[idx] = choices.chars().next().unwrap();
            if idx == 0 {
                // Carried all the way through; append a new leading-edge
                // character, preserving alternation for the new length.
                let new_len = chars.len() + 1;
                let next_choices = char_choices_for_position(new_len - 1);
                chars.push(next_choices.chars().next().unwrap());
            }
            i -= 1;
        } else {
            chars[idx] = choices.chars().nth(pos + 1).unwrap();
            break;
        }
    }

    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_ids_roundtrip() {
        let root = Id::root_version();
        assert_eq!(root.id_type(), Some(IdType::Version));
        assert_eq!(root.as_str(), "v,ROOT");

        let trunk = Id::trunk_branch();
        assert_eq!(trunk.id_type(), Some(IdType::Branch));
    }

    #[test]
    fn compose_decompose_are_inverses() {
        let id = Id::compose(Some(IdType::Version), "alice", "ba");
        let (t, user, seq) = id.decompose().unwrap();
        assert_eq!(t, Some(IdType::Version));
        assert_eq!(user, "alice");
        assert_eq!(seq, "ba");
    }

    #[test]
    fn next_id_increments_vowel_first() {
        let id = Id::compose(Some(IdType::Version), "", "ba");
        let next = id.next().unwrap();
        assert_eq!(next.as_str(), "v,be");
    }

    #[test]
    fn next_id_carries_through_consonant() {
        // 'bu' -> last vowel at position 1 overflows, carry into position 0
        let id = Id::compose(Some(IdType::Version), "", "bu");
        let next = id.next().unwrap();
        assert_eq!(next.as_str(), "v,ca");
    }

    #[test]
    fn next_id_appends_on_full_carry() {
        // 'zu' is the last two-letter sequence; next should grow to three letters.
        let id = Id::compose(Some(IdType::Version), "", "zu");
        let next = id.next().unwrap();
        assert_eq!(next.as_str().len(), "v,".len() + 3);
    }

    #[test]
    fn invalid_id_fails() {
        assert!(Id::parse("not an id!!").is_err());
    }

    #[test]
    fn empty_user_scope() {
        let id = Id::compose(Some(IdType::Branch), "", "ba");
        assert_eq!(id.as_str(), "b,ba");
        let (_, user, _) = id.decompose().unwrap();
        assert_eq!(user, "");
    }

    #[test]
    fn nonempty_user_scope_survives_roundtrip() {
        let id = Id::compose(Some(IdType::Record), "team7", "kiva");
        assert_eq!(id.as_str(), "r,team7kiva");
        let (t, user, seq) = id.decompose().unwrap();
        assert_eq!(t, Some(IdType::Record));
        assert_eq!(user, "team7");
        assert_eq!(seq, "kiva");
    }
}
