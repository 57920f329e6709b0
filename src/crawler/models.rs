use chrono::{DateTime, FixedOffset};

/// A residential complex's descriptive record, one per complex visit.
/// Card-level fields are inherited from the district listing page; the rest
/// come from the detail page's labeled info table.
#[derive(Debug, Clone)]
pub struct ComplexInfo {
    pub complex_id: String,
    pub name: String,
    pub district: Option<String>,
    pub area: Option<String>,
    pub built_year: Option<i32>,
    pub tags: Vec<String>,
    pub building_type: Option<String>,
    pub management_fee: Option<String>,
    pub prop_manager: Option<String>,
    pub prop_developer: Option<String>,
    /// `Some(-1)` means the label was present but unparsable; treat as unknown.
    pub num_of_buildings: Option<i32>,
    pub num_of_units: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Once-per-day snapshot of a complex's market counters, read off the
/// listing card. Unique on `(date, complex_id)`.
#[derive(Debug, Clone)]
pub struct ComplexDailyStats {
    pub date: DateTime<FixedOffset>,
    pub complex_id: String,
    pub name: String,
    pub for_rent: i32,
    pub on_sale_count: i32,
    pub deal_in_90days: i32,
    pub ask_avg_price: i64,
}

/// A completed sale. `house_id` is unique across the whole site.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub house_id: i64,
    pub date: DateTime<FixedOffset>,
    pub room_type: String,
    pub total_area: f64,
    pub towards: String,
    pub decoration: String,
    pub floor_location: String,
    pub building_type: String,
    pub deal_avg_price: i64,
    pub deal_total_wan: i64,
    pub ask_total_wan: i64,
    pub days_on_market: i32,
    pub complex_id: String,
    pub complex_name: String,
}

/// A currently-for-sale unit. `house_id` is unique across the whole site.
#[derive(Debug, Clone)]
pub struct ActiveListing {
    pub house_id: i64,
    pub date: DateTime<FixedOffset>,
    pub description: String,
    pub room_type: String,
    pub total_area: f64,
    pub towards: String,
    pub decoration: String,
    pub floor_location: String,
    pub building_type: String,
    /// Years-held tax flag: 0 (none), 2 or 5.
    pub tenure_status: i16,
    pub ask_total_wan: i64,
    pub ask_avg_price: i64,
    pub followers: i32,
    pub days_listed: i32,
    pub complex_id: String,
    pub complex_name: String,
}

/// Everything the extractors emit, tagged by kind. Records are immutable
/// once constructed and carry enough denormalized context to be stored
/// independently of their parent complex.
#[derive(Debug, Clone)]
pub enum Record {
    ComplexInfo(ComplexInfo),
    DailyStats(ComplexDailyStats),
    Transaction(Transaction),
    Listing(ActiveListing),
}

impl Record {
    /// Destination table for this record kind.
    pub fn destination(&self) -> &'static str {
        match self {
            Record::ComplexInfo(_) => "complex_info",
            Record::DailyStats(_) => "complex_daily_stats",
            Record::Transaction(_) => "transactions",
            Record::Listing(_) => "active_listings",
        }
    }
}
