use serde::{Deserialize, Serialize};

/// Thickness class of the cables generated for a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CableCase {
    Thin,
    Average,
    Thick,
}

/// Age bucket derived from a construction year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeClass {
    Old,
    Average,
    New,
}

impl AgeClass {
    pub fn from_year(year: i32) -> Self {
        if year <= 1970 {
            AgeClass::Old
        } else if year <= 2000 {
            AgeClass::Average
        } else {
            AgeClass::New
        }
    }
}

/// Resolves a cable type label from a construction year.
pub trait CableTypeResolver {
    fn cable_type(&self, year: i32) -> String;
}

/// Cable type table keyed on thickness class and age.
#[derive(Debug, Clone, Copy)]
pub struct YearBasedCableTypes {
    pub case: CableCase,
}

impl YearBasedCableTypes {
    pub fn new(case: CableCase) -> Self {
        Self { case }
    }
}

impl CableTypeResolver for YearBasedCableTypes {
    fn cable_type(&self, year: i32) -> String {
        let label = match (self.case, AgeClass::from_year(year)) {
            (CableCase::Thin, AgeClass::Old) => "GPLK-Cu-35",
            (CableCase::Thin, AgeClass::Average) => "GPLK-Al-50",
            (CableCase::Thin, AgeClass::New) => "XLPE-Al-95",
            (CableCase::Average, AgeClass::Old) => "GPLK-Cu-70",
            (CableCase::Average, AgeClass::Average) => "GPLK-Al-150",
            (CableCase::Average, AgeClass::New) => "XLPE-Al-150",
            (CableCase::Thick, AgeClass::Old) => "GPLK-Cu-95",
            (CableCase::Thick, AgeClass::Average) => "GPLK-Al-240",
            (CableCase::Thick, AgeClass::New) => "XLPE-Al-240",
        };
        label.to_string()
    }
}
