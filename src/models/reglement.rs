//! The settlement record (`reglement`) and the venue (`salle`) it belongs to.

/// Settlement records table.
pub const REGLEMENT_TABLE: &str = "API_user_reglement";

/// Venues table.
pub const SALLE_TABLE: &str = "API_salle";

/// Primary key of [`REGLEMENT_TABLE`].
pub const REGLEMENT_KEY: &str = "ID_reglement";

/// How a writable field is validated and bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Venue reference; integer, must exist in [`SALLE_TABLE`].
    Salle,
    /// Required free text, trimmed before storage.
    Text,
    /// Date or timestamp, normalized to UTC ISO-8601.
    Date,
    /// Amount, bound as a float.
    Amount,
}

/// A field a client may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Name in the JSON body.
    pub name: &'static str,
    /// Column it is stored in.
    pub column: &'static str,
    pub kind: FieldKind,
    /// Name used in "is required" messages.
    pub label: &'static str,
}

const fn field(name: &'static str, column: &'static str, kind: FieldKind) -> Field {
    Field {
        name,
        column,
        kind,
        label: name,
    }
}

const fn labelled(name: &'static str, label: &'static str) -> Field {
    Field {
        name,
        column: name,
        kind: FieldKind::Text,
        label,
    }
}

/// Writable fields, in column order of the insert statement.
pub const FIELDS: [Field; 15] = [
    field("id_salle", "id_salle_id", FieldKind::Salle),
    field("CONTRAT", "CONTRAT", FieldKind::Text),
    field("CLIENT", "CLIENT", FieldKind::Text),
    field("DATE_CONTRAT", "DATE_CONTRAT", FieldKind::Date),
    field("DATE_DEBUT", "DATE_DEBUT", FieldKind::Date),
    field("DATE_FIN", "DATE_FIN", FieldKind::Date),
    labelled("USERC", "USERC (Agent)"),
    field("FAMILLE", "FAMILLE", FieldKind::Text),
    labelled("SOUSFAMILLE", "SOUSFAMILLE (Sub-family)"),
    labelled("LIBELLE", "LIBELLE (Label)"),
    field("DATE_ASSURANCE", "DATE_ASSURANCE", FieldKind::Date),
    field("MONTANT", "MONTANT", FieldKind::Amount),
    labelled("MODE", "MODE (Payment Method)"),
    labelled("TARIFAIRE", "TARIFAIRE (Rate)"),
    field("DATE_REGLEMENT", "DATE_REGLEMENT", FieldKind::Date),
];

/// Order in which full validation reports problems.
pub const VALIDATION_ORDER: [&str; 15] = [
    "MONTANT",
    "CLIENT",
    "CONTRAT",
    "USERC",
    "FAMILLE",
    "SOUSFAMILLE",
    "LIBELLE",
    "MODE",
    "TARIFAIRE",
    "DATE_CONTRAT",
    "DATE_DEBUT",
    "DATE_FIN",
    "DATE_ASSURANCE",
    "DATE_REGLEMENT",
    "id_salle",
];

/// Look up a writable field by its JSON name.
pub fn find_field(name: &str) -> Option<&'static Field> {
    FIELDS.iter().find(|f| f.name == name)
}
