//! Interned X11 atoms for the control atoms and the fixed set of MIME
//! targets this bridge recognizes (spec.md §4.2).

use x11rb::connection::Connection;
use x11rb::protocol::xproto::Atom;

use crate::error::{into_unknown, BridgeError, Result};
use crate::proto::{ClipboardType, SelectionId};

x11rb::atom_manager! {
    /// Every atom the bridge ever needs, interned in a single round trip.
    pub Atoms: AtomCookies {
        CLIPBOARD,
        PRIMARY,
        TARGETS,
        INCR,
        MULTIPLE,
        ATOM,

        UTF8_STRING,
        UTF8_MIME_0: b"text/plain;charset=UTF-8",
        UTF8_MIME_1: b"text/plain;charset=utf-8",

        PNG_MIME: b"image/png",
        BMP_MIME: b"image/bmp",
        TIFF_MIME: b"image/tiff",
        JPG_MIME: b"image/jpeg",
    }
}

/// One (ClipboardType, Atom) pair: a recognized target and the bridge's
/// classification of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedAtom {
    pub ty: ClipboardType,
    pub atom: Atom,
}

pub struct AtomTable {
    atoms: Atoms,
    /// (ClipboardType, atom) pairs in `ClipboardType::ALL` order, flattened
    /// from the per-type `atom_names` list (spec.md §9's flattening note).
    catalog: Vec<TypedAtom>,
}

impl AtomTable {
    pub fn new<C: Connection>(conn: &C) -> Result<Self> {
        let cookies = Atoms::new(conn).map_err(into_unknown)?;
        let atoms = cookies.reply().map_err(|e| BridgeError::AtomInternFailed {
            description: e.to_string(),
        })?;

        let mut catalog = Vec::new();
        for ty in ClipboardType::ALL {
            for name in ty.atom_names() {
                let atom = match *name {
                    "UTF8_STRING" => atoms.UTF8_STRING,
                    "text/plain;charset=UTF-8" => atoms.UTF8_MIME_0,
                    "text/plain;charset=utf-8" => atoms.UTF8_MIME_1,
                    "image/png" => atoms.PNG_MIME,
                    "image/bmp" => atoms.BMP_MIME,
                    "image/tiff" => atoms.TIFF_MIME,
                    "image/jpeg" => atoms.JPG_MIME,
                    other => {
                        return Err(BridgeError::AtomInternFailed {
                            description: format!("no interned atom for {other}"),
                        })
                    }
                };
                catalog.push(TypedAtom { ty, atom });
            }
        }

        Ok(Self { atoms, catalog })
    }

    /// Builds an `AtomTable` with made-up, internally-consistent atom ids,
    /// without talking to an X server. Used by test doubles of
    /// [`crate::x11::X11Display`] that have no real connection to intern
    /// atoms against; the ids are arbitrary but stable and distinct, which
    /// is all `classify_target`/`selection_for_atom` need to work correctly.
    pub fn synthetic() -> Self {
        let atoms = Atoms {
            CLIPBOARD: 100,
            PRIMARY: 101,
            TARGETS: 102,
            INCR: 103,
            MULTIPLE: 104,
            ATOM: 105,
            UTF8_STRING: 106,
            UTF8_MIME_0: 107,
            UTF8_MIME_1: 108,
            PNG_MIME: 109,
            BMP_MIME: 110,
            TIFF_MIME: 111,
            JPG_MIME: 112,
        };

        let mut catalog = Vec::new();
        for ty in ClipboardType::ALL {
            for name in ty.atom_names() {
                let atom = match *name {
                    "UTF8_STRING" => atoms.UTF8_STRING,
                    "text/plain;charset=UTF-8" => atoms.UTF8_MIME_0,
                    "text/plain;charset=utf-8" => atoms.UTF8_MIME_1,
                    "image/png" => atoms.PNG_MIME,
                    "image/bmp" => atoms.BMP_MIME,
                    "image/tiff" => atoms.TIFF_MIME,
                    "image/jpeg" => atoms.JPG_MIME,
                    other => unreachable!("no synthetic atom for {other}"),
                };
                catalog.push(TypedAtom { ty, atom });
            }
        }

        Self { atoms, catalog }
    }

    pub fn control(&self) -> &Atoms {
        &self.atoms
    }

    pub fn atom_for_selection(&self, selection: SelectionId) -> Option<Atom> {
        match selection {
            SelectionId::Clipboard => Some(self.atoms.CLIPBOARD),
            SelectionId::Primary => Some(self.atoms.PRIMARY),
            SelectionId::Secondary => None,
        }
    }

    pub fn selection_for_atom(&self, atom: Atom) -> Option<SelectionId> {
        if atom == self.atoms.CLIPBOARD {
            Some(SelectionId::Clipboard)
        } else if atom == self.atoms.PRIMARY {
            Some(SelectionId::Primary)
        } else {
            None
        }
    }

    /// Classifies a target atom into a `ClipboardType`, or `None` if it is
    /// not one of the recognized MIME targets. Uses a correct nested loop
    /// (see spec.md §9, the original's equivalent function advances the
    /// outer index in the inner loop, which this implementation does not
    /// reproduce).
    pub fn classify_target(&self, atom: Atom) -> Option<ClipboardType> {
        self.catalog.iter().find(|entry| entry.atom == atom).map(|entry| entry.ty)
    }

    /// Every (type, atom) pair this bridge recognizes, in enumeration
    /// order. Used both to intersect an advertised TARGETS list (inbound)
    /// and to synthesize one (outbound).
    pub fn catalog(&self) -> &[TypedAtom] {
        &self.catalog
    }

    /// All recognized atoms for a single type, in preference order.
    pub fn atoms_for_type(&self, ty: ClipboardType) -> Vec<Atom> {
        self.catalog.iter().filter(|entry| entry.ty == ty).map(|entry| entry.atom).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x11rb::rust_connection::RustConnection;

    fn connect() -> Option<RustConnection> {
        RustConnection::connect(None).ok().map(|(conn, _)| conn)
    }

    #[test]
    fn classifies_known_targets() {
        let Some(conn) = connect() else { return };
        let table = AtomTable::new(&conn).unwrap();
        let png = table.control().PNG_MIME;
        assert_eq!(table.classify_target(png), Some(ClipboardType::ImagePng));
    }

    #[test]
    fn unknown_atom_classifies_to_none() {
        let Some(conn) = connect() else { return };
        let table = AtomTable::new(&conn).unwrap();
        // CLIPBOARD itself is a control atom, not a MIME target.
        let clipboard = table.control().CLIPBOARD;
        assert_eq!(table.classify_target(clipboard), None);
    }
}
