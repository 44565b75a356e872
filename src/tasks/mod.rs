pub mod hourly_crawl;
