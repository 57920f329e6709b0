use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use tracing::debug;

use crate::crawler::models::{ActiveListing, ComplexDailyStats, ComplexInfo, Transaction};
use crate::crawler::states::CardContext;

fn sel(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static DISTRICT_LINKS: Lazy<Selector> =
    Lazy::new(|| sel("div[data-role=\"ershoufang\"] > div:first-of-type > a"));
static PAGE_BOX: Lazy<Selector> = Lazy::new(|| sel("div.page-box.house-lst-page-box"));

static CARD: Lazy<Selector> = Lazy::new(|| sel("li.xiaoquListItem"));
static CARD_INFO: Lazy<Selector> = Lazy::new(|| sel("div.info"));
static CARD_TITLE_LINK: Lazy<Selector> = Lazy::new(|| sel("div.title > a"));
static CARD_POSITION: Lazy<Selector> = Lazy::new(|| sel("div.positionInfo"));
static POSITION_DISTRICT: Lazy<Selector> = Lazy::new(|| sel("a.district"));
static POSITION_BIZCIRCLE: Lazy<Selector> = Lazy::new(|| sel("a.bizcircle"));
static CARD_TAGS: Lazy<Selector> = Lazy::new(|| sel("div.tagList > span"));
static CARD_HOUSEINFO_LINKS: Lazy<Selector> = Lazy::new(|| sel("div.houseInfo > a"));
static CARD_PRICE: Lazy<Selector> =
    Lazy::new(|| sel("div.xiaoquListItemPrice div.totalPrice > span"));
static CARD_SELL_COUNT: Lazy<Selector> = Lazy::new(|| sel("a.totalSellCount > span"));

static INFO_ITEM: Lazy<Selector> = Lazy::new(|| sel("div.xiaoquInfoItem"));
static INFO_LABEL: Lazy<Selector> = Lazy::new(|| sel("span.xiaoquInfoLabel"));
static INFO_CONTENT: Lazy<Selector> = Lazy::new(|| sel("span.xiaoquInfoContent"));
static GEO_SPAN: Lazy<Selector> = Lazy::new(|| sel("span.xiaoquInfoContent > span"));
static DEALS_LINK: Lazy<Selector> = Lazy::new(|| sel("div#frameDeal > a"));
static LISTINGS_LINK: Lazy<Selector> = Lazy::new(|| sel("div.goodSellHeader > a"));

static TRANS_ENTRIES: Lazy<Selector> = Lazy::new(|| sel("ul.listContent > li"));
static ENTRY_LINK: Lazy<Selector> = Lazy::new(|| sel("a"));
static ENTRY_INFO: Lazy<Selector> = Lazy::new(|| sel("div.info"));
static ENTRY_TITLE_LINK: Lazy<Selector> = Lazy::new(|| sel("div.title > a"));
static ENTRY_HOUSE_INFO: Lazy<Selector> = Lazy::new(|| sel("div.address > div.houseInfo"));
static DEAL_DATE: Lazy<Selector> = Lazy::new(|| sel("div.address > div.dealDate"));
static DEAL_TOTAL: Lazy<Selector> =
    Lazy::new(|| sel("div.address div.totalPrice > span.number"));
static FLOOD_POSITION: Lazy<Selector> = Lazy::new(|| sel("div.flood > div.positionInfo"));
static DEAL_UNIT: Lazy<Selector> = Lazy::new(|| sel("div.flood div.unitPrice > span.number"));
static DEAL_CYCLE_TXT: Lazy<Selector> =
    Lazy::new(|| sel("div.dealCycleeInfo span.dealCycleTxt > span"));

static LIST_ENTRIES: Lazy<Selector> = Lazy::new(|| sel("div.leftContent ul > li"));
static TAG_FIVE: Lazy<Selector> = Lazy::new(|| sel("div.tag span.five"));
static TAG_TAXFREE: Lazy<Selector> = Lazy::new(|| sel("div.tag span.taxfree"));
static LIST_TOTAL_PRICE: Lazy<Selector> =
    Lazy::new(|| sel("div.priceInfo div.totalPrice > span"));
static LIST_UNIT_PRICE: Lazy<Selector> = Lazy::new(|| sel("div.priceInfo div.unitPrice"));
static FOLLOW_INFO: Lazy<Selector> = Lazy::new(|| sel("div.followInfo"));

static RE_DISTRICT_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/xiaoqu/(\w+)/su1").unwrap());
static RE_BUILT_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)年建成").unwrap());
static RE_DEAL_90: Lazy<Regex> = Lazy::new(|| Regex::new(r"^90天成交(\d+)").unwrap());
static RE_FOR_RENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)套正在出租").unwrap());
static RE_HOUSE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/(\d+)\.html").unwrap());
static RE_AREA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+\.?\d*)平米").unwrap());
static RE_LEADING_NUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)").unwrap());
static RE_ASK_PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^挂牌(\d+)万").unwrap());
static RE_DEAL_CYCLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^成交周期(\d+)天").unwrap());
static RE_FOLLOWERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)人关注").unwrap());
static RE_DAYS_LISTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)天以前发布").unwrap());

/// The site keeps daily snapshots keyed to China Standard Time.
static CST: Lazy<FixedOffset> = Lazy::new(|| FixedOffset::east_opt(8 * 3600).unwrap());

/// Start of the current day in CST. Cards scraped seconds apart within one
/// run coalesce to the same `(date, complex_id)` key.
pub fn snapshot_date() -> DateTime<FixedOffset> {
    Utc::now()
        .with_timezone(&*CST)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_local_timezone(*CST)
        .unwrap()
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(el: ElementRef, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(text_of)
        .filter(|text| !text.is_empty())
}

/// Pagination metadata the site echoes on every page of a paginated
/// collection: a JSON attribute with total/current page and a path template
/// with a `{page}` placeholder.
#[derive(Debug)]
pub struct PageBox {
    pub total_page: u32,
    pub cur_page: u32,
    url_template: String,
}

#[derive(Deserialize)]
struct PageData {
    #[serde(rename = "totalPage")]
    total_page: u32,
    #[serde(rename = "curPage")]
    cur_page: u32,
}

impl PageBox {
    pub fn page_path(&self, page: u32) -> String {
        self.url_template.replace("{page}", &page.to_string())
    }
}

pub fn parse_page_box(html: &Html) -> Option<PageBox> {
    let node = html.select(&PAGE_BOX).next()?;
    let data: PageData = serde_json::from_str(node.value().attr("page-data")?).ok()?;
    Some(PageBox {
        total_page: data.total_page,
        cur_page: data.cur_page,
        url_template: node.value().attr("page-url")?.to_string(),
    })
}

/// District links from the city landing page, with blacklisted district
/// codes filtered out.
pub fn parse_district_links(html: &Html, blacklist: &HashSet<String>) -> Vec<String> {
    let mut links = Vec::new();
    for anchor in html.select(&DISTRICT_LINKS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(caps) = RE_DISTRICT_PATH.captures(href) else {
            continue;
        };
        if blacklist.contains(&caps[1]) {
            debug!(district = &caps[1], "district blacklisted");
            continue;
        }
        links.push(href.to_string());
    }
    links
}

/// One complex card off a district listing page: the context to hand to the
/// detail page, the detail link, and the card's daily stats if they parsed.
#[derive(Debug)]
pub struct ComplexCard {
    pub context: CardContext,
    pub detail_href: String,
    pub daily_stats: Option<ComplexDailyStats>,
}

/// Cards from a district listing page. A card without a data-id cannot be
/// followed and is skipped entirely; a card whose stats fail to parse still
/// yields its detail follow-up.
pub fn parse_complex_cards(html: &Html) -> Vec<ComplexCard> {
    let mut cards = Vec::new();
    for card in html.select(&CARD) {
        let Some(complex_id) = card.value().attr("data-id").map(str::to_string) else {
            debug!("complex card without data-id skipped");
            continue;
        };
        let Some(info) = card.select(&CARD_INFO).next() else {
            debug!(complex_id, "card missing info block");
            continue;
        };
        let Some(title) = info.select(&CARD_TITLE_LINK).next() else {
            debug!(complex_id, "card missing title link");
            continue;
        };
        let name = text_of(title);
        let Some(detail_href) = title.value().attr("href").map(str::to_string) else {
            debug!(complex_id, "card title has no href");
            continue;
        };
        if name.is_empty() {
            debug!(complex_id, "card title is empty");
            continue;
        }
        let Some(position) = info.select(&CARD_POSITION).next() else {
            debug!(complex_id, "card missing position block");
            continue;
        };

        let daily_stats = parse_daily_stats(card, &complex_id, &name);
        if daily_stats.is_none() {
            debug!(complex_id, "daily stats dropped for card");
        }

        cards.push(ComplexCard {
            context: CardContext {
                complex_id,
                name,
                district: first_text(position, &POSITION_DISTRICT),
                area: first_text(position, &POSITION_BIZCIRCLE),
                built_year: RE_BUILT_YEAR
                    .captures(&text_of(position))
                    .and_then(|caps| caps[1].parse().ok()),
                tags: info
                    .select(&CARD_TAGS)
                    .map(text_of)
                    .filter(|tag| !tag.is_empty())
                    .collect(),
            },
            detail_href,
            daily_stats,
        });
    }
    cards
}

// Counters default to 0 when their line is absent from the card, but a line
// that is present and unparsable drops the whole snapshot. Price and sale
// count are required and never default.
fn parse_daily_stats(
    card: ElementRef,
    complex_id: &str,
    name: &str,
) -> Option<ComplexDailyStats> {
    let mut for_rent = Some(0);
    let mut deal_in_90days = Some(0);
    for link in card.select(&CARD_HOUSEINFO_LINKS) {
        let title = link.value().attr("title").unwrap_or_default();
        let text = text_of(link);
        if title.ends_with("网签") {
            deal_in_90days = RE_DEAL_90
                .captures(&text)
                .and_then(|caps| caps[1].parse().ok());
        } else if title.ends_with("租房") {
            for_rent = RE_FOR_RENT
                .captures(&text)
                .and_then(|caps| caps[1].parse().ok());
        }
    }
    let ask_avg_price = first_text(card, &CARD_PRICE)?.parse().ok()?;
    let on_sale_count = first_text(card, &CARD_SELL_COUNT)?.parse().ok()?;
    Some(ComplexDailyStats {
        date: snapshot_date(),
        complex_id: complex_id.to_string(),
        name: name.to_string(),
        for_rent: for_rent?,
        on_sale_count,
        deal_in_90days: deal_in_90days?,
        ask_avg_price,
    })
}

/// A parsed complex detail page: the completed record plus the optional
/// sub-resource links. Either link may be absent (new complexes have no
/// sale history).
#[derive(Debug)]
pub struct ComplexDetail {
    pub info: ComplexInfo,
    pub deals_href: Option<String>,
    pub listings_href: Option<String>,
}

pub fn parse_complex_detail(html: &Html, ctx: &CardContext) -> ComplexDetail {
    let mut info = ComplexInfo {
        complex_id: ctx.complex_id.clone(),
        name: ctx.name.clone(),
        district: ctx.district.clone(),
        area: ctx.area.clone(),
        built_year: ctx.built_year,
        tags: ctx.tags.clone(),
        building_type: None,
        management_fee: None,
        prop_manager: None,
        prop_developer: None,
        num_of_buildings: None,
        num_of_units: None,
        latitude: None,
        longitude: None,
    };

    for item in html.select(&INFO_ITEM) {
        let Some(label) = first_text(item, &INFO_LABEL) else {
            continue;
        };
        if label == "附近门店" {
            if let Some(raw) = item
                .select(&GEO_SPAN)
                .next()
                .and_then(|span| span.value().attr("xiaoqu"))
            {
                if let Ok((lat, lng)) = serde_json::from_str::<(f64, f64)>(raw) {
                    info.latitude = Some(lat);
                    info.longitude = Some(lng);
                }
            }
            continue;
        }
        let Some(content) = first_text(item, &INFO_CONTENT) else {
            continue;
        };
        fill_detail_field(&mut info, &label, content);
    }

    let follow_href = |selector: &Selector| {
        html.select(selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string)
    };
    ComplexDetail {
        info,
        deals_href: follow_href(&DEALS_LINK),
        listings_href: follow_href(&LISTINGS_LINK),
    }
}

// Label table for the detail page's info rows. Unknown labels are ignored;
// a missing row leaves its field unset.
fn fill_detail_field(info: &mut ComplexInfo, label: &str, content: String) {
    match label {
        "建筑类型" => info.building_type = Some(content),
        "物业费用" => info.management_fee = Some(content),
        "物业公司" => info.prop_manager = Some(content),
        "开发商" => info.prop_developer = Some(content),
        "楼栋总数" => info.num_of_buildings = Some(leading_number(&content)),
        "房屋总数" => info.num_of_units = Some(leading_number(&content)),
        _ => {}
    }
}

// "12栋" -> 12; content with no leading digit run becomes the -1 sentinel.
fn leading_number(content: &str) -> i32 {
    RE_LEADING_NUM
        .captures(content)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(-1)
}

/// Completed sales on a deal-history page. Entries whose house id or price
/// fields do not parse are dropped individually.
pub fn parse_transactions(html: &Html, complex_id: &str, complex_name: &str) -> Vec<Transaction> {
    let mut transactions = Vec::new();
    for entry in html.select(&TRANS_ENTRIES) {
        match parse_transaction_entry(entry, complex_id, complex_name) {
            Some(transaction) => transactions.push(transaction),
            None => debug!(complex_id, "transaction entry dropped"),
        }
    }
    transactions
}

fn parse_transaction_entry(
    entry: ElementRef,
    complex_id: &str,
    complex_name: &str,
) -> Option<Transaction> {
    let href = entry.select(&ENTRY_LINK).next()?.value().attr("href")?;
    let house_id = RE_HOUSE_ID.captures(href)?[1].parse().ok()?;
    let info = entry.select(&ENTRY_INFO).next()?;

    // Title reads "<name> <rooms> <area>平米"; parking berths are not homes.
    let title = first_text(info, &ENTRY_TITLE_LINK)?;
    let parts: Vec<&str> = title.split_whitespace().collect();
    if parts.len() < 3 || parts[1] == "车位" {
        return None;
    }
    let room_type = parts[1].to_string();
    let total_area = RE_AREA.captures(parts[2])?[1].parse().ok()?;

    let house_info = first_text(info, &ENTRY_HOUSE_INFO)?;
    let (towards, decoration) = split_pipe_pair(&house_info)?;

    let date = NaiveDate::parse_from_str(&first_text(info, &DEAL_DATE)?, "%Y.%m.%d")
        .ok()?
        .and_hms_opt(0, 0, 0)?
        .and_local_timezone(*CST)
        .single()?;

    let deal_total_wan = first_text(info, &DEAL_TOTAL)?.parse().ok()?;
    let position = first_text(info, &FLOOD_POSITION)?;
    let mut position_parts = position.split_whitespace();
    let floor_location = position_parts.next()?.to_string();
    let building_type = position_parts.next()?.to_string();
    let deal_avg_price = first_text(info, &DEAL_UNIT)?.parse().ok()?;

    let cycle_texts: Vec<String> = info.select(&DEAL_CYCLE_TXT).map(text_of).collect();
    if cycle_texts.len() < 2 {
        return None;
    }
    let ask_total_wan = RE_ASK_PRICE.captures(&cycle_texts[0])?[1].parse().ok()?;
    let days_on_market = RE_DEAL_CYCLE.captures(&cycle_texts[1])?[1].parse().ok()?;

    Some(Transaction {
        house_id,
        date,
        room_type,
        total_area,
        towards,
        decoration,
        floor_location,
        building_type,
        deal_avg_price,
        deal_total_wan,
        ask_total_wan,
        days_on_market,
        complex_id: complex_id.to_string(),
        complex_name: complex_name.to_string(),
    })
}

fn split_pipe_pair(text: &str) -> Option<(String, String)> {
    let (left, right) = text.split_once('|')?;
    Some((left.trim().to_string(), right.trim().to_string()))
}

/// Currently-for-sale units on an active-listings page.
pub fn parse_listings(html: &Html, complex_id: &str, complex_name: &str) -> Vec<ActiveListing> {
    let date = snapshot_date();
    let mut listings = Vec::new();
    for entry in html.select(&LIST_ENTRIES) {
        match parse_listing_entry(entry, date, complex_id, complex_name) {
            Some(listing) => listings.push(listing),
            None => debug!(complex_id, "listing entry dropped"),
        }
    }
    listings
}

fn parse_listing_entry(
    entry: ElementRef,
    date: DateTime<FixedOffset>,
    complex_id: &str,
    complex_name: &str,
) -> Option<ActiveListing> {
    let info = entry.select(&ENTRY_INFO).next()?;
    let title = info.select(&ENTRY_TITLE_LINK).next()?;
    let house_id = RE_HOUSE_ID.captures(title.value().attr("href")?)?[1].parse().ok()?;
    let description = text_of(title);

    let house_info = first_text(info, &ENTRY_HOUSE_INFO)?;
    let parts: Vec<String> = house_info
        .split('|')
        .map(|part| part.trim().to_string())
        .collect();
    if parts.len() < 6 {
        return None;
    }
    let total_area = RE_AREA.captures(&parts[1])?[1].parse().ok()?;

    let tenure_status = if info.select(&TAG_FIVE).next().is_some() {
        2
    } else if info.select(&TAG_TAXFREE).next().is_some() {
        5
    } else {
        0
    };

    let ask_total_wan = first_text(info, &LIST_TOTAL_PRICE)?.parse().ok()?;
    let ask_avg_price = info
        .select(&LIST_UNIT_PRICE)
        .next()?
        .value()
        .attr("data-price")?
        .parse()
        .ok()?;

    let mut followers = 0;
    let mut days_listed = 0;
    if let Some(text) = first_text(info, &FOLLOW_INFO) {
        let (left, right) = text.split_once('/').unwrap_or((text.as_str(), ""));
        if let Some(caps) = RE_FOLLOWERS.captures(left.trim()) {
            followers = caps[1].parse().unwrap_or(0);
        }
        if let Some(caps) = RE_DAYS_LISTED.captures(right.trim()) {
            days_listed = caps[1].parse().unwrap_or(0);
        }
    }

    Some(ActiveListing {
        house_id,
        date,
        description,
        room_type: parts[0].clone(),
        total_area,
        towards: parts[2].clone(),
        decoration: parts[3].clone(),
        floor_location: parts[4].clone(),
        building_type: parts.last()?.clone(),
        tenure_status,
        ask_total_wan,
        ask_avg_price,
        followers,
        days_listed,
        complex_id: complex_id.to_string(),
        complex_name: complex_name.to_string(),
    })
}
