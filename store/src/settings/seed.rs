//! Default rows for a fresh database.

use serde::Serialize;
use tracing::info;

use super::{count, set_many, CountryRiskPremium, GrowthWeight, ImpliedErp, IndexPriceMovement};
use super::{IndustryBeta, MarginalTaxRate, RiskFreeRate, Setting, StddevWeight};
use crate::error::StoreResult;
use crate::session::Session;

/// Year the default tax rates are recorded under.
const TAX_RATE_YEAR: i32 = 2025;

/// Rows inserted per table; tables that already had rows are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub seeded: Vec<(&'static str, u64)>,
}

impl SeedReport {
    pub fn total(&self) -> u64 {
        self.seeded.iter().map(|(_, n)| n).sum()
    }
}

/// Fill every empty settings table with its defaults. Tables holding any
/// row are left alone, so running this again is harmless.
pub async fn seed_defaults(session: &mut Session) -> StoreResult<SeedReport> {
    let mut report = SeedReport::default();
    seed(session, &mut report, growth_weights()).await?;
    seed(session, &mut report, stddev_weights()).await?;
    seed(session, &mut report, risk_free_rates()).await?;
    seed(session, &mut report, index_movements()).await?;
    seed(session, &mut report, implied_erps()).await?;
    seed(session, &mut report, country_risk_premiums()).await?;
    seed(session, &mut report, tax_rates()).await?;
    seed(session, &mut report, industry_betas()).await?;
    info!(tables = report.seeded.len(), rows = report.total(), "Seeded default settings");
    Ok(report)
}

async fn seed<S: Setting>(
    session: &mut Session,
    report: &mut SeedReport,
    rows: Vec<S>,
) -> StoreResult<()> {
    if count::<S>(session).await? > 0 {
        return Ok(());
    }
    let written = set_many(session, &rows).await?;
    report.seeded.push((S::TABLE, written));
    Ok(())
}

fn growth_weights() -> Vec<GrowthWeight> {
    [
        ("Accumulated Equity Growth", 12.0),
        ("Pretax Income Growth", 12.0),
        ("ROCE", 15.0),
        ("Net Income Growth", 20.0),
        ("ROE", 20.0),
        ("Revenue Growth", 15.0),
        ("Operating Margin", 20.0),
        ("YoY Operating Margin Growth", 20.0),
        ("NOPAT Growth", 15.0),
        ("FCFE Growth", 15.0),
        ("Earnings Power Change %", 20.0),
        ("Change in EP Delta", 20.0),
        ("Spread", 20.0),
    ]
    .into_iter()
    .map(|(factor, weight)| GrowthWeight::new(factor, weight))
    .collect()
}

fn stddev_weights() -> Vec<StddevWeight> {
    [
        ("Revenue Growth", 20.0),
        ("Net Income Growth", 20.0),
        ("Operating Margin", 20.0),
        ("ROE", 20.0),
        ("ROCE", 20.0),
        ("Pretax Income Growth", 15.0),
        ("Accumulated Equity Growth", 15.0),
        ("NOPAT Growth", 15.0),
        ("YoY Operating Margin Growth", 12.0),
        ("Earnings Power Change %", 10.0),
        ("Change in EP Delta", 10.0),
        ("Spread", 10.0),
        ("FCFE Growth", 10.0),
    ]
    .into_iter()
    .map(|(factor, weight)| StddevWeight::new(factor, weight))
    .collect()
}

fn risk_free_rates() -> Vec<RiskFreeRate> {
    [
        (2015, 2.14, 7.70, 3.40, 0.36),
        (2016, 1.84, 6.95, 2.90, -0.06),
        (2017, 2.33, 6.70, 3.60, 0.05),
        (2018, 2.91, 7.70, 3.60, 0.07),
        (2019, 2.14, 6.70, 3.20, -0.10),
        (2020, 0.89, 5.95, 2.90, 0.01),
        (2021, 1.45, 6.20, 2.95, 0.07),
        (2022, 2.95, 7.29, 2.75, 0.23),
        (2023, 3.96, 7.18, 2.70, 0.56),
        (2024, 4.25, 6.95, 2.30, 0.92),
        (2025, 4.00, 6.49, 1.83, 1.80),
    ]
    .into_iter()
    .map(|(year, usa, india, china, japan)| RiskFreeRate::new(year, usa, india, china, japan))
    .collect()
}

fn index_movements() -> Vec<IndexPriceMovement> {
    [
        (2015, 5.70, -0.70),
        (2016, 7.50, 9.50),
        (2017, 28.20, 19.40),
        (2018, -3.90, -6.20),
        (2019, 35.20, 28.90),
        (2020, 43.60, 16.30),
        (2021, 21.40, 26.90),
        (2022, -33.10, -19.40),
        (2023, 43.40, 24.20),
        (2024, 28.60, 23.30),
        (2025, 19.20, 15.00),
    ]
    .into_iter()
    .map(|(year, nasdaq, sp500)| IndexPriceMovement::new(year, nasdaq, sp500))
    .collect()
}

fn implied_erps() -> Vec<ImpliedErp> {
    [
        (2010, 4.36, "Recovery from 2008 Financial Crisis."),
        (2011, 5.20, "Recovery from 2010 flash crash/jitters."),
        (2012, 6.01, "Eurozone debt crisis fears."),
        (2013, 5.78, "Fiscal cliff concerns early in the year."),
        (2014, 4.96, "Low volatility environment."),
        (2015, 5.78, "Steady recovery pricing."),
        (2016, 6.12, "Concerns over China growth and oil price crash."),
        (2017, 5.69, "Post-election uncertainty and growth hopes."),
        (2018, 5.08, "Tax cuts enacted; steady growth expectations."),
        (2019, 5.96, "Higher risk pricing following late 2018 market drop."),
        (2020, 5.20, "Pre-pandemic level (spiked to >6.0% in March 2020)."),
        (2021, 4.72, "Post-COVID recovery optimism."),
        (2022, 4.24, "Low ERP at start of year before inflation/rates spiked."),
        (2023, 5.94, "Spike due to high inflation and aggressive Fed hikes."),
        (2024, 4.60, "Decreased from 2023 as inflation fears eased."),
        (2025, 4.33, "Market priced for \"soft landing\" despite high rates."),
    ]
    .into_iter()
    .map(|(year, premium, notes)| ImpliedErp::new(year, premium, Some(notes)))
    .collect()
}

fn country_risk_premiums() -> Vec<CountryRiskPremium> {
    [
        (2015, 3.46, 0.95, 1.11, 0.00, 0.63, 0.78),
        (2016, 3.13, 0.86, 1.00, 0.00, 0.56, 0.71),
        (2017, 2.19, 0.81, 0.81, 0.00, 0.57, 0.57),
        (2018, 2.64, 0.98, 0.98, 0.00, 0.69, 0.69),
        (2019, 1.88, 0.69, 0.69, 0.00, 0.49, 0.49),
        (2020, 2.13, 0.68, 0.68, 0.00, 0.59, 0.48),
        (2021, 2.18, 0.70, 0.70, 0.00, 0.60, 0.49),
        (2022, 3.79, 1.22, 1.22, 0.00, 1.03, 0.85),
        (2023, 3.21, 1.03, 1.03, 0.00, 0.88, 0.72),
        (2024, 2.93, 0.94, 0.94, 0.00, 0.80, 0.66),
        (2025, 2.85, 0.91, 0.91, 0.23, 0.78, 0.64),
    ]
    .into_iter()
    .map(|(year, india, china, japan, us, uk, uae)| CountryRiskPremium {
        year,
        india,
        china,
        japan,
        us,
        uk,
        uae,
    })
    .collect()
}

fn tax_rates() -> Vec<MarginalTaxRate> {
    [
        (
            "USA",
            25.70,
            "Federal (21%) + State Tax (~4-5%). 25.7% is the OECD composite rate used for a diversified US company.",
        ),
        (
            "India",
            25.17,
            "Base (22%) + Surcharge (10%) + Cess (4%) under Section 115BAA. Use 34.94% for companies outside that regime.",
        ),
        (
            "China",
            25.00,
            "Standard national rate. Use 15% only for a qualified High-Tech Enterprise.",
        ),
        (
            "Japan",
            30.62,
            "National + Local Inhabitant + Enterprise Tax. Headline rate is 23.2%; 30.62% is the effective statutory rate.",
        ),
    ]
    .into_iter()
    .map(|(country, rate, notes)| MarginalTaxRate::new(country, TAX_RATE_YEAR, rate, Some(notes)))
    .collect()
}

fn industry_betas() -> Vec<IndustryBeta> {
    [
        ("Technology : Internet Content & Info", "Software (Internet)", 1.63, 1.69),
        ("Technology : Semiconductors", "Semiconductor", 1.36, 1.45),
        ("Technology : Semi. Equip & Materials", "Semiconductor Equip", 1.35, 1.44),
        ("Technology : Software - Infrastructure", "Software (System & Application)", 1.20, 1.22),
        ("Technology : Software - Application", "Software (System & Application)", 1.20, 1.22),
        ("Technology : Scientific Instruments", "Electrical Equipment", 1.20, 1.23),
        ("Technology : Computer Hardware", "Computers/Peripherals", 1.10, 1.12),
        ("Technology : IT Services", "Computer Services", 1.03, 1.09),
        ("Technology : Electronic Components", "Electronics (General)", 1.01, 1.03),
        ("Technology : Comm. Equipment", "Telecom. Equipment", 0.91, 0.95),
        ("Technology : Electronics & Distribution", "Retail (Distributors)", 0.91, 0.93),
        ("Technology : Consumer Electronics", "Electronics (Consumer & Office)", 0.84, 0.95),
        ("Technology : Solar", "Green & Renewable Energy", 0.49, 0.50),
        ("Technology : Telecom (Wireless)", "Telecom (Wireless)", 0.57, 0.59),
    ]
    .into_iter()
    .map(|(industry, sector, unlevered, cash_adjusted)| {
        IndustryBeta::new(industry, sector, unlevered, cash_adjusted)
    })
    .collect()
}
