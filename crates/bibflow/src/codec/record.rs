/// A single MARC record as seen by the pipeline.
///
/// The pipeline only ever asks for the control number; the fields are
/// carried through untouched to the XML writer and the storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub leader: String,
    pub control_fields: Vec<ControlField>,
    pub data_fields: Vec<DataField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlField {
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    pub tag: String,
    pub ind1: char,
    pub ind2: char,
    pub subfields: Vec<Subfield>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

pub const LEADER_LENGTH: usize = 24;

impl Record {
    pub fn new(leader: impl Into<String>) -> Self {
        Self {
            leader: leader.into(),
            control_fields: Vec::new(),
            data_fields: Vec::new(),
        }
    }

    pub fn with_control_field(mut self, tag: &str, value: &str) -> Self {
        self.set_control_field(tag, value);
        self
    }

    pub fn with_data_field(mut self, field: DataField) -> Self {
        self.data_fields.push(field);
        self
    }

    /// Value of the 001 control field.
    pub fn control_number(&self) -> Option<&str> {
        self.control_field("001")
    }

    pub fn control_field(&self, tag: &str) -> Option<&str> {
        self.control_fields
            .iter()
            .find(|f| f.tag == tag)
            .map(|f| f.value.as_str())
    }

    /// Replaces the first control field with `tag`, or appends a new one
    /// keeping control fields sorted by tag.
    pub fn set_control_field(&mut self, tag: &str, value: &str) {
        if let Some(field) = self.control_fields.iter_mut().find(|f| f.tag == tag) {
            field.value = value.to_string();
            return;
        }
        let position = self
            .control_fields
            .iter()
            .position(|f| f.tag.as_str() > tag)
            .unwrap_or(self.control_fields.len());
        self.control_fields.insert(
            position,
            ControlField {
                tag: tag.to_string(),
                value: value.to_string(),
            },
        );
    }

    /// Record status (leader position 5).
    pub fn status(&self) -> Option<char> {
        self.leader.chars().nth(5)
    }

    pub fn set_status(&mut self, status: char) {
        if self.leader.chars().count() < LEADER_LENGTH {
            return;
        }
        self.leader = self
            .leader
            .chars()
            .enumerate()
            .map(|(i, c)| if i == 5 { status } else { c })
            .collect();
    }

    pub fn is_deleted(&self) -> bool {
        self.status() == Some('d')
    }

    pub fn has_valid_leader(&self) -> bool {
        self.leader.chars().count() == LEADER_LENGTH
    }
}

impl DataField {
    pub fn new(tag: &str, ind1: char, ind2: char) -> Self {
        Self {
            tag: tag.to_string(),
            ind1,
            ind2,
            subfields: Vec::new(),
        }
    }

    pub fn with_subfield(mut self, code: char, value: &str) -> Self {
        self.subfields.push(Subfield {
            code,
            value: value.to_string(),
        });
        self
    }
}
