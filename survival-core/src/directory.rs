//! Patient lookup used by import and export.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::record::{Patient, PatientId};

/// Read access to the patient demographics store.
pub trait PatientDirectory {
    /// Resolves a sheet reference number. Surrounding whitespace is ignored.
    fn find_by_referral(&self, referral_number: &str) -> Option<&Patient>;

    fn get(&self, id: PatientId) -> Option<&Patient>;
}

/// Directory held in memory, e.g. loaded from a JSON list of patients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Patient>", into = "Vec<Patient>")]
pub struct InMemoryDirectory {
    patients: Vec<Patient>,
    by_referral: HashMap<String, usize>,
    by_id: HashMap<PatientId, usize>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a patient, replacing any existing entry with the same id.
    pub fn insert(&mut self, patient: Patient) {
        let referral = patient.referral_number.trim().to_string();
        match self.by_id.get(&patient.id).copied() {
            Some(slot) => {
                let old = std::mem::replace(&mut self.patients[slot], patient);
                let old_referral = old.referral_number.trim();
                if self.by_referral.get(old_referral) == Some(&slot) {
                    self.by_referral.remove(old_referral);
                }
                self.by_referral.insert(referral, slot);
            }
            None => {
                let slot = self.patients.len();
                self.by_id.insert(patient.id, slot);
                self.by_referral.insert(referral, slot);
                self.patients.push(patient);
            }
        }
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }
}

impl PatientDirectory for InMemoryDirectory {
    fn find_by_referral(&self, referral_number: &str) -> Option<&Patient> {
        self.by_referral
            .get(referral_number.trim())
            .map(|&slot| &self.patients[slot])
    }

    fn get(&self, id: PatientId) -> Option<&Patient> {
        self.by_id.get(&id).map(|&slot| &self.patients[slot])
    }
}

impl From<Vec<Patient>> for InMemoryDirectory {
    fn from(patients: Vec<Patient>) -> Self {
        let mut directory = Self::new();
        for patient in patients {
            directory.insert(patient);
        }
        directory
    }
}

impl From<InMemoryDirectory> for Vec<Patient> {
    fn from(directory: InMemoryDirectory) -> Self {
        directory.patients
    }
}

impl FromIterator<Patient> for InMemoryDirectory {
    fn from_iter<I: IntoIterator<Item = Patient>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}
