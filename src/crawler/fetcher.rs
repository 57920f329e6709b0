use reqwest::Client;

pub fn build_client() -> Client {
    Client::builder()
        .user_agent("xiaoqu-scraper/0.1")
        .build()
        .expect("failed to build http client")
}

pub async fn fetch_html(client: &Client, url: &str) -> anyhow::Result<String> {
    let res = client.get(url).send().await?.error_for_status()?;
    Ok(res.text().await?)
}
