//! Person kinds and the rules attached to each.

use chrono::{Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::CustomerError;

/// Minimum age, in whole years, of a physical person on registration.
pub const MINIMUM_AGE_YEARS: u32 = 18;

/// Whether the customer is an individual or a company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersonType {
    Physical,
    Legal,
}

impl PersonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonType::Physical => "Physical",
            PersonType::Legal => "Legal",
        }
    }
}

impl std::fmt::Display for PersonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PersonType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Physical" => Ok(PersonType::Physical),
            "Legal" => Ok(PersonType::Legal),
            other => Err(format!("unknown person type: {other}")),
        }
    }
}

/// Type-specific customer data. The variant fixes the person type for the
/// lifetime of the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "person_type")]
pub enum PersonProfile {
    Physical {
        birth_date: NaiveDate,
    },
    Legal {
        state_registration: Option<String>,
        registration_exempt: bool,
        founding_date: Option<NaiveDate>,
    },
}

impl PersonProfile {
    pub fn person_type(&self) -> PersonType {
        match self {
            PersonProfile::Physical { .. } => PersonType::Physical,
            PersonProfile::Legal { .. } => PersonType::Legal,
        }
    }

    pub fn birth_date(&self) -> Option<NaiveDate> {
        match self {
            PersonProfile::Physical { birth_date } => Some(*birth_date),
            PersonProfile::Legal { .. } => None,
        }
    }

    pub fn state_registration(&self) -> Option<&str> {
        match self {
            PersonProfile::Legal {
                state_registration, ..
            } => state_registration.as_deref(),
            PersonProfile::Physical { .. } => None,
        }
    }

    /// Checks the age rule for individuals and the registration rule for
    /// companies, as of `today`.
    pub fn validate_on(&self, today: NaiveDate) -> Result<(), CustomerError> {
        match self {
            PersonProfile::Physical { birth_date } => check_age(*birth_date, today),
            PersonProfile::Legal {
                state_registration,
                registration_exempt,
                ..
            } => {
                let blank = state_registration
                    .as_deref()
                    .is_none_or(|s| s.trim().is_empty());
                if blank && !registration_exempt {
                    return Err(CustomerError::MissingStateRegistration);
                }
                Ok(())
            }
        }
    }
}

/// The editable fields of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub document: String,
    pub phone: String,
    pub email: String,
    pub profile: PersonProfile,
}

impl CustomerDetails {
    pub fn person_type(&self) -> PersonType {
        self.profile.person_type()
    }
}

/// `birth_date + 18 years <= today`. A Feb 29 birthday reaches the mark
/// on Feb 28 of non-leap years.
pub fn is_adult_on(birth_date: NaiveDate, today: NaiveDate) -> bool {
    birth_date
        .checked_add_months(Months::new(MINIMUM_AGE_YEARS * 12))
        .is_some_and(|adult_on| adult_on <= today)
}

pub(crate) fn check_age(birth_date: NaiveDate, today: NaiveDate) -> Result<(), CustomerError> {
    if is_adult_on(birth_date, today) {
        Ok(())
    } else {
        Err(CustomerError::Underage {
            birth_date,
            minimum_age: MINIMUM_AGE_YEARS,
        })
    }
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn legal(state_registration: Option<&str>, exempt: bool) -> PersonProfile {
        PersonProfile::Legal {
            state_registration: state_registration.map(str::to_string),
            registration_exempt: exempt,
            founding_date: None,
        }
    }

    #[test]
    fn test_exactly_eighteen_is_adult() {
        assert!(is_adult_on(date(2006, 5, 10), date(2024, 5, 10)));
    }

    #[test]
    fn test_one_day_short_is_underage() {
        assert!(!is_adult_on(date(2006, 5, 11), date(2024, 5, 10)));

        let profile = PersonProfile::Physical {
            birth_date: date(2006, 5, 11),
        };
        assert!(matches!(
            profile.validate_on(date(2024, 5, 10)),
            Err(CustomerError::Underage { minimum_age: 18, .. })
        ));
    }

    #[test]
    fn test_leap_day_birthday_rolls_to_feb_28() {
        let birth = date(2004, 2, 29);
        assert!(is_adult_on(birth, date(2022, 2, 28)));
        assert!(!is_adult_on(birth, date(2022, 2, 27)));
    }

    #[test]
    fn test_blank_registration_requires_exemption() {
        let today = date(2024, 1, 1);
        assert!(matches!(
            legal(Some("   "), false).validate_on(today),
            Err(CustomerError::MissingStateRegistration)
        ));
        assert!(legal(None, false).validate_on(today).is_err());
        assert!(legal(Some(""), true).validate_on(today).is_ok());
        assert!(legal(Some("123.456.789"), false).validate_on(today).is_ok());
    }

    #[test]
    fn test_type_specific_accessors() {
        let physical = PersonProfile::Physical {
            birth_date: date(1990, 1, 1),
        };
        assert_eq!(physical.person_type(), PersonType::Physical);
        assert_eq!(physical.birth_date(), Some(date(1990, 1, 1)));
        assert_eq!(physical.state_registration(), None);

        let company = legal(Some("ISENTO-1"), false);
        assert_eq!(company.person_type(), PersonType::Legal);
        assert_eq!(company.birth_date(), None);
        assert_eq!(company.state_registration(), Some("ISENTO-1"));
    }

    #[test]
    fn test_person_type_round_trips_through_str() {
        for kind in [PersonType::Physical, PersonType::Legal] {
            assert_eq!(kind.as_str().parse::<PersonType>().unwrap(), kind);
        }
        assert!("Robot".parse::<PersonType>().is_err());
    }
}
