//! tinycalc-core — primitives partagées
//!
//! Fournit :
//! - `SourceId`, `Pos`, `Span`, `Spanned<T>`
//! - Constantes TCBC (`MAGIC_TCBC`, `TCBC_VERSION`) + `SectionTag` (fourcc)
//! - IO mémoire (little-endian) : `ByteWriter`, `ByteReader`
//! - `crc32_ieee` (compact, sans table)
//! - Erreurs `CoreError` + alias `CoreResult<T>`
//! - [`bytecode`] : instructions de la machine à pile, modules `.tcbc`,
//!   validation, évaluation et désassemblage.
//!
//! Features :
//! - `serde` : derive (dé)sérialisation sur les structures utiles

#![deny(missing_docs)]

/* ─────────────────────────── Imports ─────────────────────────── */

use std::borrow::Cow;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/* ─────────────────────────── Modules publics ─────────────────────────── */

/// Instructions, modules, validation, runtime et désassembleur.
pub mod bytecode;

/// Raccourci vers les validations structurelles.
pub use bytecode::helpers;
/// Raccourci vers le désassembleur textuel.
pub use bytecode::disasm;
/// Raccourci vers la VM d'évaluation.
pub use bytecode::runtime;

/* ─────────────────────────── Résultat commun ─────────────────────────── */

/// Alias résultat commun au core.
pub type CoreResult<T> = Result<T, CoreError>;

/* ─────────────────────────── Spans / Positions ─────────────────────────── */

/// Identifiant de source (fichier, buffer, ligne de commande…).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceId(pub u32);

/// Position (offset byte) depuis le début de la source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pos(pub u32);

impl Pos {
    /// Position nulle.
    pub const ZERO: Self = Self(0);
}

/// Plage (demi-ouverte) `[start, end)` dans une source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Span {
    /// Source d’où provient l’item.
    pub source: SourceId,
    /// Début inclus.
    pub start: Pos,
    /// Fin exclue.
    pub end: Pos,
}

impl Span {
    /// Crée un span.
    pub const fn new(source: SourceId, start: Pos, end: Pos) -> Self { Self { source, start, end } }
    /// Longueur en bytes.
    pub const fn len(&self) -> u32 { self.end.0.saturating_sub(self.start.0) }
    /// Vrai si le span est vide.
    pub const fn is_empty(&self) -> bool { self.start.0 >= self.end.0 }
}

/// Wrapper utilitaire « valeur + span ».
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Spanned<T> {
    /// La valeur.
    pub value: T,
    /// La localisation.
    pub span: Span,
}

impl<T> Spanned<T> {
    /// Construit un `Spanned<T>`.
    pub const fn new(value: T, span: Span) -> Self { Self { value, span } }
}

/* ─────────────────────────── TCBC — Constantes & Tags ─────────────────────────── */

/// Magic d’un module TinyCalc : `b"TCBC"`.
pub const MAGIC_TCBC: &[u8; 4] = b"TCBC";

/// Version actuelle du format `.tcbc`.
pub const TCBC_VERSION: u16 = 1;

/// Extension de fichier des modules compilés.
pub const MODULE_EXTENSION: &str = "tcbc";

/// Tags de section (fourcc) — exactement 4 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionTag {
    /// NAME : nom du module (UTF-8)
    NAME = u32::from_be_bytes(*b"NAME"),
    /// FLTS : f64 array (LE)
    FLTS = u32::from_be_bytes(*b"FLTS"),
    /// CODE : méthodes (nom, retour, max_stack, ops)
    CODE = u32::from_be_bytes(*b"CODE"),
    /// SRCE : texte source embarqué (debug)
    SRCE = u32::from_be_bytes(*b"SRCE"),
    /// CRCC : CRC32 trailer (u32 LE)
    CRCC = u32::from_be_bytes(*b"CRCC"),
}

impl SectionTag {
    /// Renvoie le fourcc sous forme de 4 octets big-endian.
    pub const fn to_be_bytes(self) -> [u8; 4] { (self as u32).to_be_bytes() }
    /// Lit un tag depuis 4 octets big-endian.
    pub const fn from_be_bytes(b: [u8; 4]) -> Option<Self> {
        match u32::from_be_bytes(b) {
            x if x == Self::NAME as u32 => Some(Self::NAME),
            x if x == Self::FLTS as u32 => Some(Self::FLTS),
            x if x == Self::CODE as u32 => Some(Self::CODE),
            x if x == Self::SRCE as u32 => Some(Self::SRCE),
            x if x == Self::CRCC as u32 => Some(Self::CRCC),
            _ => None,
        }
    }
    /// Nom lisible (les 4 caractères ASCII).
    pub const fn name(self) -> &'static str {
        match self {
            Self::NAME => "NAME",
            Self::FLTS => "FLTS",
            Self::CODE => "CODE",
            Self::SRCE => "SRCE",
            Self::CRCC => "CRCC",
        }
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/* ─────────────────────────── CRC32 IEEE ─────────────────────────── */

/// CRC32 (IEEE 802.3) — implémentation compacte sans table.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ u32::from(b)) & 0xFF;
        // polynôme réfléchi 0xEDB88320, bit à bit
        for _ in 0..8 {
            let mask = (x & 1).wrapping_neg() & 0xEDB8_8320;
            x = (x >> 1) ^ mask;
        }
        crc = (crc >> 8) ^ x;
    }
    !crc
}

/* ─────────────────────────── Byte Writer (LE) ─────────────────────────── */

/// Buffer d’écriture (croît automatiquement).
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    /// Crée un writer vide.
    pub const fn new() -> Self { Self { buf: Vec::new() } }
    /// Accès en lecture au contenu.
    pub fn as_slice(&self) -> &[u8] { &self.buf }
    /// Longueur courante.
    pub fn len(&self) -> usize { self.buf.len() }
    /// Vrai si rien n’a été écrit.
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    /// Récupère le buffer (consomme).
    pub fn into_vec(self) -> Vec<u8> { self.buf }
    /// Ajoute des octets bruts.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.extend_from_slice(bytes); }
    /// Écrit un octet.
    pub fn write_u8(&mut self, v: u8) { self.buf.push(v); }
    /// Écrit un tag (fourcc big-endian).
    pub fn write_tag(&mut self, tag: SectionTag) { self.write_bytes(&tag.to_be_bytes()); }
    /// Écrit un u16 little-endian.
    pub fn write_u16_le(&mut self, v: u16) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un u32 little-endian.
    pub fn write_u32_le(&mut self, v: u32) { self.buf.extend_from_slice(&v.to_le_bytes()); }
    /// Écrit un f64 little-endian.
    pub fn write_f64_le(&mut self, v: f64) { self.buf.extend_from_slice(&v.to_le_bytes()); }

    /// Écrit une chaîne préfixée par sa longueur (`u32` LE).
    pub fn write_str(&mut self, s: &str) -> CoreResult<()> {
        let len = u32::try_from(s.len())
            .map_err(|_| CoreError::InvalidLength { section: None, len: s.len() as u64 })?;
        self.write_u32_le(len);
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Écrit une section `[tag][len:u32][payload]`.
    pub fn write_section(&mut self, tag: SectionTag, payload: &[u8]) -> CoreResult<()> {
        let len = u32::try_from(payload.len()).map_err(|_| CoreError::InvalidLength {
            section: Some(Cow::Borrowed(tag.name())),
            len: payload.len() as u64,
        })?;
        self.write_tag(tag);
        self.write_u32_le(len);
        self.write_bytes(payload);
        Ok(())
    }
}

/* ─────────────────────────── Byte Reader (LE) ─────────────────────────── */

/// Lecteur séquentiel sur un slice d’octets (helpers LE).
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> ByteReader<'a> {
    /// Construit un lecteur.
    pub const fn new(data: &'a [u8]) -> Self { Self { data, off: 0 } }
    /// Offset courant.
    pub const fn offset(&self) -> usize { self.off }
    /// Taille restante.
    pub const fn remaining(&self) -> usize { self.data.len().saturating_sub(self.off) }
    /// Vrai si tout a été consommé.
    pub const fn is_at_end(&self) -> bool { self.remaining() == 0 }

    /// Lit `n` octets (ou erreur si EOF).
    pub fn read_bytes(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CoreError::UnexpectedEof { needed: n as u64, at: self.off as u64 });
        }
        let start = self.off;
        self.off += n;
        Ok(&self.data[start..self.off])
    }

    /// Lit un tableau de taille fixe.
    fn read_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut arr = [0u8; N];
        arr.copy_from_slice(self.read_bytes(N)?);
        Ok(arr)
    }

    /// Lit un tag (fourcc big-endian).
    pub fn read_tag(&mut self) -> CoreResult<SectionTag> {
        let arr = self.read_array::<4>()?;
        SectionTag::from_be_bytes(arr).ok_or(CoreError::InvalidSectionTag { raw: u32::from_be_bytes(arr) })
    }

    /// Lit un octet.
    pub fn read_u8(&mut self) -> CoreResult<u8> { Ok(self.read_array::<1>()?[0]) }

    /// Lit un u16 LE.
    pub fn read_u16_le(&mut self) -> CoreResult<u16> { Ok(u16::from_le_bytes(self.read_array()?)) }

    /// Lit un u32 LE.
    pub fn read_u32_le(&mut self) -> CoreResult<u32> { Ok(u32::from_le_bytes(self.read_array()?)) }

    /// Lit un u64 LE.
    pub fn read_u64_le(&mut self) -> CoreResult<u64> { Ok(u64::from_le_bytes(self.read_array()?)) }

    /// Lit un f64 LE.
    pub fn read_f64_le(&mut self) -> CoreResult<f64> { Ok(f64::from_bits(self.read_u64_le()?)) }

    /// Lit une chaîne préfixée par sa longueur.
    pub fn read_str(&mut self) -> CoreResult<&'a str> {
        let len = self.read_u32_le()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|_| CoreError::InvalidUtf8)
    }
}

/* ─────────────────────────── Erreurs ─────────────────────────── */

/// Erreurs de bas niveau communes (format, validation, exécution).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CoreError {
    /// Magic TCBC invalide (attendu `b"TCBC"`).
    InvalidMagic,
    /// Tag de section inconnu.
    InvalidSectionTag { /// Valeur brute du tag.
        raw: u32
    },
    /// Fin de buffer inattendue.
    UnexpectedEof { /// Nombre d’octets manquants.
        needed: u64, /// Offset où l’erreur s’est produite.
        at: u64
    },
    /// Longueur de section invalide (ex: dépasse le buffer).
    InvalidLength { /// Nom de section (si connu).
        section: Option<Cow<'static, str>>, /// Longueur fautive.
        len: u64
    },
    /// UTF-8 invalide.
    InvalidUtf8,
    /// CRC32 du module ne correspond pas au contenu.
    HashMismatch { /// CRC recalculé sur le contenu.
        expected: u32, /// CRC lu dans le trailer.
        found: u32
    },
    /// Dépilement sur pile vide.
    StackUnderflow { /// Méthode en cours.
        method: Cow<'static, str>, /// Compteur d’instruction fautif.
        pc: u32
    },
    /// Méthode introuvable dans le module.
    UnknownMethod(Cow<'static, str>),
    /// Données corrompues (format / invariants).
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Construit une erreur « corrompu ».
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { Self::Corrupted(msg.into()) }
    /// Construit une erreur « méthode inconnue ».
    pub fn unknown_method(name: impl Into<Cow<'static, str>>) -> Self { Self::UnknownMethod(name.into()) }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid TCBC magic"),
            Self::InvalidSectionTag { raw } => write!(f, "invalid section tag: 0x{raw:08X}"),
            Self::UnexpectedEof { needed, at } => write!(f, "unexpected EOF: need {needed} bytes at {at}"),
            Self::InvalidLength { section, len } => {
                if let Some(s) = section { write!(f, "invalid length for {s}: {len}") }
                else { write!(f, "invalid length: {len}") }
            }
            Self::InvalidUtf8 => write!(f, "invalid utf-8"),
            Self::HashMismatch { expected, found } => {
                write!(f, "hash mismatch (crc32): expected=0x{expected:08X}, found=0x{found:08X}")
            }
            Self::StackUnderflow { method, pc } => write!(f, "stack underflow in `{method}` at pc {pc}"),
            Self::UnknownMethod(name) => write!(f, "unknown method `{name}`"),
            Self::Corrupted(msg) => write!(f, "corrupted: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

/* ─────────────────────────── Tests ─────────────────────────── */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        // valeur de référence IEEE pour "123456789"
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_ieee(b""), 0);
    }

    #[test]
    fn tags_roundtrip() {
        for t in [SectionTag::NAME, SectionTag::FLTS, SectionTag::CODE, SectionTag::SRCE, SectionTag::CRCC] {
            assert_eq!(SectionTag::from_be_bytes(t.to_be_bytes()), Some(t));
        }
        assert_eq!(SectionTag::from_be_bytes(*b"DATA"), None);
    }

    #[test]
    fn writer_reader_le() -> CoreResult<()> {
        let mut w = ByteWriter::new();
        w.write_u16_le(0xBEEF);
        w.write_u32_le(0xDEAD_BEEF);
        w.write_f64_le(3.5);
        w.write_str("get")?;
        w.write_tag(SectionTag::CODE);

        let mut r = ByteReader::new(w.as_slice());
        assert_eq!(r.read_u16_le()?, 0xBEEF);
        assert_eq!(r.read_u32_le()?, 0xDEAD_BEEF);
        assert_eq!(r.read_f64_le()?, 3.5);
        assert_eq!(r.read_str()?, "get");
        assert_eq!(r.read_tag()?, SectionTag::CODE);
        assert!(r.is_at_end());
        Ok(())
    }

    #[test]
    fn reader_reports_eof_offset() {
        let mut r = ByteReader::new(&[1, 2]);
        assert_eq!(r.read_u32_le(), Err(CoreError::UnexpectedEof { needed: 4, at: 0 }));
    }
}
