use serde::{Deserialize, Serialize};

use super::Setting;
use crate::error::StoreResult;
use crate::table::RowRef;
use crate::value::Value;

macro_rules! weight_factor {
    ($(#[$meta:meta])* $name:ident, $table:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub factor: String,
            pub weight: f64,
        }

        impl $name {
            pub fn new(factor: impl Into<String>, weight: f64) -> Self {
                Self {
                    factor: factor.into(),
                    weight,
                }
            }
        }

        impl Setting for $name {
            const TABLE: &'static str = $table;
            const KEY_COLUMNS: &'static [&'static str] = &["factor"];
            const VALUE_COLUMNS: &'static [&'static str] = &["weight"];
            const STAMPED: bool = false;

            type Key = String;

            fn key_values(key: &String) -> Vec<Value> {
                vec![key.into()]
            }

            fn key(&self) -> String {
                self.factor.clone()
            }

            fn values(&self) -> Vec<Value> {
                vec![self.weight.into()]
            }

            fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
                Ok(Self {
                    factor: row.get("factor")?,
                    weight: row.get("weight")?,
                })
            }
        }
    };
}

weight_factor!(
    /// Weight of one factor in the growth score.
    GrowthWeight,
    "growth_weight_factors"
);

weight_factor!(
    /// Weight of one factor in the volatility score.
    StddevWeight,
    "stddev_weight_factors"
);

/// Risk-free rates for a year, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFreeRate {
    pub year: i32,
    pub usa: f64,
    pub india: f64,
    pub china: f64,
    pub japan: f64,
}

impl RiskFreeRate {
    pub fn new(year: i32, usa: f64, india: f64, china: f64, japan: f64) -> Self {
        Self {
            year,
            usa,
            india,
            china,
            japan,
        }
    }

    /// Rate for a canonical country name; USA for anything unsupported.
    pub fn for_country(&self, country: &str) -> f64 {
        match country {
            "India" => self.india,
            "China" => self.china,
            "Japan" => self.japan,
            _ => self.usa,
        }
    }
}

impl Setting for RiskFreeRate {
    const TABLE: &'static str = "risk_free_rates";
    const KEY_COLUMNS: &'static [&'static str] = &["year"];
    const VALUE_COLUMNS: &'static [&'static str] = &["usa_rf", "india_rf", "china_rf", "japan_rf"];

    type Key = i32;

    fn key_values(key: &i32) -> Vec<Value> {
        vec![(*key).into()]
    }

    fn key(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.usa.into(),
            self.india.into(),
            self.china.into(),
            self.japan.into(),
        ]
    }

    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            year: row.get("year")?,
            usa: row.get("usa_rf")?,
            india: row.get("india_rf")?,
            china: row.get("china_rf")?,
            japan: row.get("japan_rf")?,
        })
    }
}

/// Annual price movement of the benchmark indices, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPriceMovement {
    pub year: i32,
    pub nasdaq_composite: f64,
    pub sp500: f64,
}

impl IndexPriceMovement {
    pub fn new(year: i32, nasdaq_composite: f64, sp500: f64) -> Self {
        Self {
            year,
            nasdaq_composite,
            sp500,
        }
    }
}

impl Setting for IndexPriceMovement {
    const TABLE: &'static str = "index_annual_price_movement";
    const KEY_COLUMNS: &'static [&'static str] = &["year"];
    const VALUE_COLUMNS: &'static [&'static str] = &["nasdaq_composite", "sp500"];

    type Key = i32;

    fn key_values(key: &i32) -> Vec<Value> {
        vec![(*key).into()]
    }

    fn key(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<Value> {
        vec![self.nasdaq_composite.into(), self.sp500.into()]
    }

    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            year: row.get("year")?,
            nasdaq_composite: row.get("nasdaq_composite")?,
            sp500: row.get("sp500")?,
        })
    }
}

/// Implied equity risk premium for the US market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpliedErp {
    pub year: i32,
    pub premium: f64,
    pub notes: Option<String>,
}

impl ImpliedErp {
    pub fn new(year: i32, premium: f64, notes: Option<&str>) -> Self {
        Self {
            year,
            premium,
            notes: notes.map(str::to_string),
        }
    }
}

impl Setting for ImpliedErp {
    const TABLE: &'static str = "implied_equity_risk_premium_usa";
    const KEY_COLUMNS: &'static [&'static str] = &["year"];
    const VALUE_COLUMNS: &'static [&'static str] = &["implied_erp", "notes"];

    type Key = i32;

    fn key_values(key: &i32) -> Vec<Value> {
        vec![(*key).into()]
    }

    fn key(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<Value> {
        vec![self.premium.into(), self.notes.clone().into()]
    }

    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            year: row.get("year")?,
            premium: row.get("implied_erp")?,
            notes: row.get("notes")?,
        })
    }
}

/// Country risk premium by year, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRiskPremium {
    pub year: i32,
    pub india: f64,
    pub china: f64,
    pub japan: f64,
    pub us: f64,
    pub uk: f64,
    pub uae: f64,
}

impl Setting for CountryRiskPremium {
    const TABLE: &'static str = "country_risk_premium";
    const KEY_COLUMNS: &'static [&'static str] = &["year"];
    const VALUE_COLUMNS: &'static [&'static str] = &["india", "china", "japan", "us", "uk", "uae"];

    type Key = i32;

    fn key_values(key: &i32) -> Vec<Value> {
        vec![(*key).into()]
    }

    fn key(&self) -> i32 {
        self.year
    }

    fn values(&self) -> Vec<Value> {
        vec![
            self.india.into(),
            self.china.into(),
            self.japan.into(),
            self.us.into(),
            self.uk.into(),
            self.uae.into(),
        ]
    }

    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            year: row.get("year")?,
            india: row.get("india")?,
            china: row.get("china")?,
            japan: row.get("japan")?,
            us: row.get("us")?,
            uk: row.get("uk")?,
            uae: row.get("uae")?,
        })
    }
}

/// Effective marginal corporate tax rate of a country for a year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalTaxRate {
    pub country: String,
    pub year: i32,
    pub rate: f64,
    pub notes: Option<String>,
}

impl MarginalTaxRate {
    pub fn new(country: impl Into<String>, year: i32, rate: f64, notes: Option<&str>) -> Self {
        Self {
            country: country.into(),
            year,
            rate,
            notes: notes.map(str::to_string),
        }
    }
}

impl Setting for MarginalTaxRate {
    const TABLE: &'static str = "marginal_corporate_tax_rates";
    const KEY_COLUMNS: &'static [&'static str] = &["country", "year"];
    const VALUE_COLUMNS: &'static [&'static str] = &["effective_rate", "notes"];

    type Key = (String, i32);

    fn key_values((country, year): &(String, i32)) -> Vec<Value> {
        vec![country.into(), (*year).into()]
    }

    fn key(&self) -> (String, i32) {
        (self.country.clone(), self.year)
    }

    fn values(&self) -> Vec<Value> {
        vec![self.rate.into(), self.notes.clone().into()]
    }

    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            country: row.get("country")?,
            year: row.get("year")?,
            rate: row.get("effective_rate")?,
            notes: row.get("notes")?,
        })
    }
}

/// Damodaran-style industry beta mapped onto a user industry bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryBeta {
    pub industry: String,
    pub sector: String,
    pub unlevered: f64,
    pub cash_adjusted: f64,
}

impl IndustryBeta {
    pub fn new(
        industry: impl Into<String>,
        sector: impl Into<String>,
        unlevered: f64,
        cash_adjusted: f64,
    ) -> Self {
        Self {
            industry: industry.into(),
            sector: sector.into(),
            unlevered,
            cash_adjusted,
        }
    }
}

impl Setting for IndustryBeta {
    const TABLE: &'static str = "industry_betas";
    const KEY_COLUMNS: &'static [&'static str] = &["user_industry_bucket", "mapped_sector"];
    const VALUE_COLUMNS: &'static [&'static str] = &["unlevered_beta", "cash_adjusted_beta"];

    type Key = (String, String);

    fn key_values((industry, sector): &(String, String)) -> Vec<Value> {
        vec![industry.into(), sector.into()]
    }

    fn key(&self) -> (String, String) {
        (self.industry.clone(), self.sector.clone())
    }

    fn values(&self) -> Vec<Value> {
        vec![self.unlevered.into(), self.cash_adjusted.into()]
    }

    fn from_row(row: RowRef<'_>) -> StoreResult<Self> {
        Ok(Self {
            industry: row.get("user_industry_bucket")?,
            sector: row.get("mapped_sector")?,
            unlevered: row.get("unlevered_beta")?,
            cash_adjusted: row.get("cash_adjusted_beta")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn assert_catalogued<S: Setting>() {
        let info = schema::table(S::TABLE).unwrap();
        assert_eq!(info.key, S::KEY_COLUMNS, "{}", S::TABLE);
        for column in S::VALUE_COLUMNS {
            assert!(info.columns.contains(column), "{}.{column}", S::TABLE);
        }
        assert_eq!(info.columns.contains(&"updated_at"), S::STAMPED, "{}", S::TABLE);
    }

    #[test]
    fn test_kinds_match_catalog() {
        assert_catalogued::<GrowthWeight>();
        assert_catalogued::<StddevWeight>();
        assert_catalogued::<RiskFreeRate>();
        assert_catalogued::<IndexPriceMovement>();
        assert_catalogued::<ImpliedErp>();
        assert_catalogued::<CountryRiskPremium>();
        assert_catalogued::<MarginalTaxRate>();
        assert_catalogued::<IndustryBeta>();
    }

    #[test]
    fn test_risk_free_rate_for_country() {
        let rate = RiskFreeRate::new(2025, 4.0, 6.49, 1.83, 1.8);
        assert_eq!(rate.for_country("India"), 6.49);
        assert_eq!(rate.for_country("Japan"), 1.8);
        assert_eq!(rate.for_country("UK"), 4.0);
    }
}
