//! Identifiants de cantiques : préfixe alphabétique + numéro dense
//!
//! Un identifiant standard a la forme `<préfixe><entier>` (ex: `H12`,
//! `HI3`). Le tri « naturel » compare les suites de chiffres comme des
//! nombres, pas comme des caractères : `C2 < C10`.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};

/// Identifiant structuré d'un cantique
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SongId {
    /// Préfixe de catégorie (ex: `H`, `C`, `HI`)
    pub prefix: String,
    /// Numéro dans le groupe de préfixe (≥ 1)
    pub number: u32,
}

impl SongId {
    pub fn new(prefix: impl Into<String>, number: u32) -> Self {
        Self {
            prefix: prefix.into(),
            number,
        }
    }

    /// Tente de décomposer un identifiant en `(préfixe, numéro)`
    ///
    /// Retourne `None` si l'identifiant ne suit pas le format standard
    /// (lettres ASCII suivies d'un entier, rien d'autre).
    pub fn try_parse(id: &str) -> Option<Self> {
        let split = id.find(|c: char| c.is_ascii_digit())?;
        let (prefix, digits) = id.split_at(split);

        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let number: u32 = digits.parse().ok()?;
        if number == 0 {
            return None;
        }

        Some(Self::new(prefix, number))
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.number)
    }
}

impl FromStr for SongId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_parse(s).ok_or_else(|| crate::Error::MalformedId(s.to_string()))
    }
}

/// Comparaison naturelle (insensible à la casse) de deux identifiants
///
/// Les suites de chiffres sont comparées numériquement, le reste
/// caractère par caractère. C'est l'ordre d'affichage du recueil :
/// `["C1", "C2", "C10"]` et non `["C1", "C10", "C2"]`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let run_a = take_digit_run(&mut ca);
                    let run_b = take_digit_run(&mut cb);
                    let ord = cmp_digit_runs(&run_a, &run_b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                } else {
                    let xa = x.to_ascii_lowercase();
                    let yb = y.to_ascii_lowercase();
                    if xa != yb {
                        return xa.cmp(&yb);
                    }
                    ca.next();
                    cb.next();
                }
            }
        }
    }
}

fn take_digit_run(it: &mut Peekable<Chars>) -> String {
    let mut run = String::new();
    while let Some(c) = it.peek() {
        if c.is_ascii_digit() {
            run.push(*c);
            it.next();
        } else {
            break;
        }
    }
    run
}

/// Compare deux suites de chiffres sans les convertir (pas de limite de taille)
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
