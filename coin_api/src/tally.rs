use coin_detection::Detections;
use serde::Serialize;

/// Thai baht coins the model is trained to recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denomination {
    OneBaht,
    FiveBaht,
    TenBaht,
}

impl Denomination {
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "1baht" => Some(Self::OneBaht),
            "5baht" => Some(Self::FiveBaht),
            "10baht" => Some(Self::TenBaht),
            _ => None,
        }
    }

    pub fn value(&self) -> u64 {
        match self {
            Denomination::OneBaht => 1,
            Denomination::FiveBaht => 5,
            Denomination::TenBaht => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoinDetails {
    #[serde(rename = "1baht")]
    pub one_baht: u64,
    #[serde(rename = "5baht")]
    pub five_baht: u64,
    #[serde(rename = "10baht")]
    pub ten_baht: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoinTally {
    /// Every detection returned by the model, recognized or not.
    pub total_count: u64,
    pub total_value: u64,
    pub details: CoinDetails,
}

impl CoinTally {
    pub fn add(&mut self, denomination: Denomination) {
        let counter = match denomination {
            Denomination::OneBaht => &mut self.details.one_baht,
            Denomination::FiveBaht => &mut self.details.five_baht,
            Denomination::TenBaht => &mut self.details.ten_baht,
        };
        *counter += 1;
        self.total_value += denomination.value();
    }

    pub fn message(&self) -> String {
        format!(
            "Found {} coins with a total value of {} baht",
            self.total_count, self.total_value
        )
    }
}

impl From<&Detections> for CoinTally {
    fn from(detections: &Detections) -> Self {
        let mut tally = CoinTally {
            total_count: detections.len() as u64,
            ..Default::default()
        };
        for detection in detections {
            match Denomination::from_label(&detection.class_label) {
                Some(denomination) => tally.add(denomination),
                None => tracing::debug!("Ignoring unrecognized label {}", detection.class_label),
            }
        }
        tally
    }
}
