use std::collections::HashSet;

use scraper::Html;
use tracing::warn;

use crate::crawler::models::Record;
use crate::crawler::parser;

/// Named states of the crawl flow. The crawl engine fetches a follow-up's
/// URL and re-invokes [`dispatch`] with its state and inherited context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Home,
    DistrictFirstPage,
    DistrictPage,
    ComplexDetail,
    TransactionsFirstPage,
    TransactionsPage,
    ListingsFirstPage,
    ListingsPage,
}

/// Values the parent page already resolved, carried forward immutably.
#[derive(Debug, Clone, Default)]
pub enum Context {
    #[default]
    None,
    Card(CardContext),
    Complex {
        complex_id: String,
        complex_name: String,
    },
}

/// Card-level fields a district listing page resolves before following the
/// complex detail link.
#[derive(Debug, Clone)]
pub struct CardContext {
    pub complex_id: String,
    pub name: String,
    pub district: Option<String>,
    pub area: Option<String>,
    pub built_year: Option<i32>,
    pub tags: Vec<String>,
}

/// A discovered link plus the state and context needed to process the page
/// it points to.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub url: String,
    pub state: CrawlState,
    pub context: Context,
}

#[derive(Debug, Default)]
pub struct PageOutput {
    pub records: Vec<Record>,
    pub follow_ups: Vec<FollowUp>,
}

/// The fixed crawl target: base URL for joining relative links and the
/// district blacklist applied at the landing page.
#[derive(Debug, Clone)]
pub struct Site {
    pub base_url: String,
    pub district_blacklist: HashSet<String>,
}

impl Site {
    pub fn join(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

/// Flat state-to-handler table. Handlers are pure functions of the page and
/// inherited context, so concurrent invocation is safe.
pub fn dispatch(state: CrawlState, html: &Html, context: &Context, site: &Site) -> PageOutput {
    match state {
        CrawlState::Home => handle_home(html, site),
        CrawlState::DistrictFirstPage => handle_district(html, site, true),
        CrawlState::DistrictPage => handle_district(html, site, false),
        CrawlState::ComplexDetail => match context {
            Context::Card(card) => handle_complex_detail(html, card, site),
            _ => context_mismatch(state),
        },
        CrawlState::TransactionsFirstPage
        | CrawlState::TransactionsPage
        | CrawlState::ListingsFirstPage
        | CrawlState::ListingsPage => match context {
            Context::Complex {
                complex_id,
                complex_name,
            } => handle_sub_resource(html, site, state, complex_id, complex_name),
            _ => context_mismatch(state),
        },
    }
}

fn context_mismatch(state: CrawlState) -> PageOutput {
    warn!(state = ?state, "handler invoked with unexpected context");
    PageOutput::default()
}

fn handle_home(html: &Html, site: &Site) -> PageOutput {
    let follow_ups = parser::parse_district_links(html, &site.district_blacklist)
        .into_iter()
        .map(|href| FollowUp {
            url: site.join(&href),
            state: CrawlState::DistrictFirstPage,
            context: Context::None,
        })
        .collect();
    PageOutput {
        records: Vec::new(),
        follow_ups,
    }
}

fn handle_district(html: &Html, site: &Site, first_page: bool) -> PageOutput {
    let mut output = PageOutput::default();
    for card in parser::parse_complex_cards(html) {
        if let Some(stats) = card.daily_stats {
            output.records.push(Record::DailyStats(stats));
        }
        output.follow_ups.push(FollowUp {
            url: site.join(&card.detail_href),
            state: CrawlState::ComplexDetail,
            context: Context::Card(card.context),
        });
    }
    if first_page {
        output.follow_ups.extend(pagination_follow_ups(
            html,
            site,
            CrawlState::DistrictPage,
            Context::None,
        ));
    }
    output
}

fn handle_complex_detail(html: &Html, card: &CardContext, site: &Site) -> PageOutput {
    let detail = parser::parse_complex_detail(html, card);
    let sub_context = Context::Complex {
        complex_id: detail.info.complex_id.clone(),
        complex_name: detail.info.name.clone(),
    };

    let mut output = PageOutput::default();
    output.records.push(Record::ComplexInfo(detail.info));
    if let Some(href) = detail.deals_href {
        output.follow_ups.push(FollowUp {
            url: site.join(&href),
            state: CrawlState::TransactionsFirstPage,
            context: sub_context.clone(),
        });
    }
    if let Some(href) = detail.listings_href {
        output.follow_ups.push(FollowUp {
            url: site.join(&href),
            state: CrawlState::ListingsFirstPage,
            context: sub_context,
        });
    }
    output
}

fn handle_sub_resource(
    html: &Html,
    site: &Site,
    state: CrawlState,
    complex_id: &str,
    complex_name: &str,
) -> PageOutput {
    let mut output = PageOutput::default();
    output.records = match state {
        CrawlState::TransactionsFirstPage | CrawlState::TransactionsPage => {
            parser::parse_transactions(html, complex_id, complex_name)
                .into_iter()
                .map(Record::Transaction)
                .collect()
        }
        _ => parser::parse_listings(html, complex_id, complex_name)
            .into_iter()
            .map(Record::Listing)
            .collect(),
    };

    // Only the first page fans out pagination; deeper pages echo the same
    // metadata and re-emitting it would blow up the request count.
    let next_state = match state {
        CrawlState::TransactionsFirstPage => Some(CrawlState::TransactionsPage),
        CrawlState::ListingsFirstPage => Some(CrawlState::ListingsPage),
        _ => None,
    };
    if let Some(next_state) = next_state {
        output.follow_ups.extend(pagination_follow_ups(
            html,
            site,
            next_state,
            Context::Complex {
                complex_id: complex_id.to_string(),
                complex_name: complex_name.to_string(),
            },
        ));
    }
    output
}

fn pagination_follow_ups(
    html: &Html,
    site: &Site,
    state: CrawlState,
    context: Context,
) -> Vec<FollowUp> {
    let Some(page_box) = parser::parse_page_box(html) else {
        return Vec::new();
    };
    if page_box.cur_page != 1 {
        return Vec::new();
    }
    (2..=page_box.total_page)
        .map(|page| FollowUp {
            url: site.join(&page_box.page_path(page)),
            state,
            context: context.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::models::Record;

    fn site() -> Site {
        Site {
            base_url: "https://sh.lianjia.com".to_string(),
            district_blacklist: ["jinshan".to_string()].into_iter().collect(),
        }
    }

    const DISTRICT_PAGE_HTML: &str = r#"
        <ul>
          <li class="clear xiaoquListItem" data-id="12345">
            <div class="info">
              <div class="title"><a href="/xiaoqu/12345/">Green Court</a></div>
              <div class="positionInfo"><a class="district">Pudong</a></div>
              <div class="houseInfo"><a title="x租房">3套正在出租</a></div>
            </div>
            <div class="xiaoquListItemPrice"><div class="totalPrice"><span>85000</span></div></div>
            <a class="totalSellCount"><span>12</span></a>
          </li>
          <li class="clear xiaoquListItem" data-id="67890">
            <div class="info">
              <div class="title"><a href="/xiaoqu/67890/">Lake View</a></div>
              <div class="positionInfo"></div>
            </div>
          </li>
          <li class="clear xiaoquListItem">
            <div class="info">
              <div class="title"><a href="/xiaoqu/0/">No Id Court</a></div>
              <div class="positionInfo"></div>
            </div>
          </li>
        </ul>
        <div class="page-box house-lst-page-box" page-url="/xiaoqu/pudong/pg{page}/" page-data='{"totalPage":3,"curPage":1}'></div>
    "#;

    fn detail_follow_ups(output: &PageOutput) -> Vec<&FollowUp> {
        output
            .follow_ups
            .iter()
            .filter(|f| f.state == CrawlState::ComplexDetail)
            .collect()
    }

    #[test]
    fn district_first_page_emits_cards_and_pagination() {
        let html = Html::parse_document(DISTRICT_PAGE_HTML);
        let output = dispatch(CrawlState::DistrictFirstPage, &html, &Context::None, &site());

        // One card's stats parsed, the other's did not; both cards still get
        // exactly one detail follow-up, the id-less card none.
        assert_eq!(output.records.len(), 1);
        let details = detail_follow_ups(&output);
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].url, "https://sh.lianjia.com/xiaoqu/12345/");

        let pagination: Vec<_> = output
            .follow_ups
            .iter()
            .filter(|f| f.state == CrawlState::DistrictPage)
            .collect();
        assert_eq!(pagination.len(), 2);
        assert_eq!(pagination[0].url, "https://sh.lianjia.com/xiaoqu/pudong/pg2/");
        assert_eq!(pagination[1].url, "https://sh.lianjia.com/xiaoqu/pudong/pg3/");
    }

    #[test]
    fn deeper_district_pages_never_paginate() {
        let html = Html::parse_document(DISTRICT_PAGE_HTML);
        let output = dispatch(CrawlState::DistrictPage, &html, &Context::None, &site());
        assert_eq!(detail_follow_ups(&output).len(), 2);
        assert!(output
            .follow_ups
            .iter()
            .all(|f| f.state == CrawlState::ComplexDetail));
    }

    #[test]
    fn home_filters_blacklisted_districts() {
        let html = Html::parse_document(
            r#"<div data-role="ershoufang"><div>
                 <a href="/xiaoqu/pudong/su1y4bp5ep10000/">Pudong</a>
                 <a href="/xiaoqu/jinshan/su1y4bp5ep10000/">Jinshan</a>
               </div></div>"#,
        );
        let output = dispatch(CrawlState::Home, &html, &Context::None, &site());
        assert_eq!(output.follow_ups.len(), 1);
        assert_eq!(output.follow_ups[0].state, CrawlState::DistrictFirstPage);
        assert_eq!(
            output.follow_ups[0].url,
            "https://sh.lianjia.com/xiaoqu/pudong/su1y4bp5ep10000/"
        );
        assert!(output.records.is_empty());
    }

    #[test]
    fn complex_detail_emits_info_and_sub_resource_follow_ups() {
        let html = Html::parse_document(
            r#"<div class="xiaoquInfo">
                 <div class="xiaoquInfoItem"><span class="xiaoquInfoLabel">楼栋总数</span><span class="xiaoquInfoContent">12栋</span></div>
               </div>
               <div id="frameDeal"><a href="/chengjiao/c12345/">deals</a></div>
               <div class="goodSellHeader clear"><a href="/ershoufang/c12345/">on sale</a></div>"#,
        );
        let context = Context::Card(CardContext {
            complex_id: "12345".into(),
            name: "Green Court".into(),
            district: Some("Pudong".into()),
            area: None,
            built_year: Some(2005),
            tags: Vec::new(),
        });
        let output = dispatch(CrawlState::ComplexDetail, &html, &context, &site());

        assert_eq!(output.records.len(), 1);
        match &output.records[0] {
            Record::ComplexInfo(info) => {
                assert_eq!(info.complex_id, "12345");
                assert_eq!(info.num_of_buildings, Some(12));
            }
            other => panic!("expected ComplexInfo, got {other:?}"),
        }

        assert_eq!(output.follow_ups.len(), 2);
        assert_eq!(output.follow_ups[0].state, CrawlState::TransactionsFirstPage);
        assert_eq!(
            output.follow_ups[0].url,
            "https://sh.lianjia.com/chengjiao/c12345/"
        );
        assert_eq!(output.follow_ups[1].state, CrawlState::ListingsFirstPage);
        for follow_up in &output.follow_ups {
            match &follow_up.context {
                Context::Complex {
                    complex_id,
                    complex_name,
                } => {
                    assert_eq!(complex_id, "12345");
                    assert_eq!(complex_name, "Green Court");
                }
                other => panic!("expected Complex context, got {other:?}"),
            }
        }
    }

    #[test]
    fn detail_without_sub_links_is_normal() {
        let html = Html::parse_document("<div class=\"xiaoquInfo\"></div>");
        let context = Context::Card(CardContext {
            complex_id: "9".into(),
            name: "New Court".into(),
            district: None,
            area: None,
            built_year: None,
            tags: Vec::new(),
        });
        let output = dispatch(CrawlState::ComplexDetail, &html, &context, &site());
        assert_eq!(output.records.len(), 1);
        assert!(output.follow_ups.is_empty());
    }

    const TRANSACTIONS_HTML: &str = r#"
        <ul class="listContent">
          <li>
            <a href="/chengjiao/107103123456.html"></a>
            <div class="info">
              <div class="title"><a href="/chengjiao/107103123456.html">绿庭 2室1厅 75.6平米</a></div>
              <div class="address">
                <div class="houseInfo">南 北 | 精装</div>
                <div class="dealDate">2024.03.12</div>
                <div class="totalPrice"><span class="number">610</span></div>
              </div>
              <div class="flood">
                <div class="positionInfo">中楼层(共18层) 板楼</div>
                <div class="unitPrice"><span class="number">80688</span></div>
              </div>
              <div class="dealCycleeInfo"><span class="dealCycleTxt"><span>挂牌620万</span><span>成交周期34天</span></span></div>
            </div>
          </li>
        </ul>
        <div class="page-box house-lst-page-box" page-url="/chengjiao/pg{page}c12345/" page-data='{"totalPage":3,"curPage":1}'></div>
    "#;

    fn complex_context() -> Context {
        Context::Complex {
            complex_id: "12345".into(),
            complex_name: "Green Court".into(),
        }
    }

    #[test]
    fn transactions_first_page_paginates_once() {
        let html = Html::parse_document(TRANSACTIONS_HTML);
        let output = dispatch(
            CrawlState::TransactionsFirstPage,
            &html,
            &complex_context(),
            &site(),
        );
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.follow_ups.len(), 2);
        for (follow_up, page) in output.follow_ups.iter().zip([2, 3]) {
            assert_eq!(follow_up.state, CrawlState::TransactionsPage);
            assert_eq!(
                follow_up.url,
                format!("https://sh.lianjia.com/chengjiao/pg{page}c12345/")
            );
        }
    }

    #[test]
    fn deeper_transaction_pages_never_paginate() {
        // Same page body, deeper state: records only, no follow-up fan-out.
        let html = Html::parse_document(TRANSACTIONS_HTML);
        let output = dispatch(
            CrawlState::TransactionsPage,
            &html,
            &complex_context(),
            &site(),
        );
        assert_eq!(output.records.len(), 1);
        assert!(output.follow_ups.is_empty());
    }

    #[test]
    fn first_page_guard_checks_current_page_metadata() {
        let html = Html::parse_document(
            &TRANSACTIONS_HTML.replace("\"curPage\":1", "\"curPage\":2"),
        );
        let output = dispatch(
            CrawlState::TransactionsFirstPage,
            &html,
            &complex_context(),
            &site(),
        );
        assert!(output.follow_ups.is_empty());
    }

    #[test]
    fn sub_resource_with_wrong_context_yields_nothing() {
        let html = Html::parse_document(TRANSACTIONS_HTML);
        let output = dispatch(
            CrawlState::TransactionsFirstPage,
            &html,
            &Context::None,
            &site(),
        );
        assert!(output.records.is_empty());
        assert!(output.follow_ups.is_empty());
    }
}
