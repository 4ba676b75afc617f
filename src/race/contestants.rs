use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contestant {
    pub transmitter_id: u32,
    pub name: String,
}

impl fmt::Display for Contestant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Transmitter ID: {})", self.name, self.transmitter_id)
    }
}

/// Registered racers, looked up by transponder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contestants {
    contestants: Vec<Contestant>,
}

impl Contestants {
    pub fn new(contestants: Vec<Contestant>) -> Contestants {
        Contestants { contestants }
    }

    pub fn name_of(&self, transmitter_id: u32) -> String {
        self.contestants.iter()
            .find(|contestant| contestant.transmitter_id == transmitter_id)
            .map(|contestant| contestant.name.clone())
            .unwrap_or_else(|| format!["Unknown (ID: {})", transmitter_id])
    }

    pub fn len(&self) -> usize {
        self.contestants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contestants.is_empty()
    }
}
