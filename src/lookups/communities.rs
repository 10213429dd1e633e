use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use super::CommunityLookup;

/// CommunityStore maps BGP community strings to descriptions, backed by SQLite
#[derive(Clone)]
pub struct CommunityStore {
    pool: Pool<Sqlite>,
}

impl CommunityStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context("Failed to connect to community database")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Drop and rebuild the table from every `*.txt` file in `dirs`.
    /// Later directories override earlier ones. Returns the number of rows written.
    pub async fn rebuild(&self, dirs: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DROP TABLE IF EXISTS communities")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE TABLE communities (community TEXT PRIMARY KEY, name TEXT NOT NULL)")
            .execute(&mut *tx)
            .await?;

        let mut written = 0;
        for dir in dirs {
            for (community, name) in read_community_dir(Path::new(dir))? {
                sqlx::query(
                    "INSERT INTO communities (community, name) VALUES (?, ?) \
                     ON CONFLICT(community) DO UPDATE SET name = excluded.name",
                )
                .bind(&community)
                .bind(&name)
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }

        tx.commit().await?;
        Ok(written)
    }
}

/// `<community><whitespace><description>` per line. Comments and blank lines are skipped.
pub fn parse_community_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (community, name) = line.split_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                Some((community.to_string(), name.to_string()))
            }
        })
        .collect()
}

fn read_community_dir(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.is_dir() {
        tracing::warn!("Community directory {} does not exist, skipping", dir.display());
        return Ok(Vec::new());
    }

    let mut files: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    files.sort();

    let mut records = Vec::new();
    for path in files {
        tracing::debug!("Building BGP community data from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        records.extend(parse_community_file(&content));
    }
    Ok(records)
}

#[async_trait]
impl CommunityLookup for CommunityStore {
    async fn lookup_many(&self, communities: &BTreeSet<String>) -> Result<HashMap<String, String>> {
        if communities.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; communities.len()].join(",");
        let sql = format!(
            "SELECT community, name FROM communities WHERE community IN ({})",
            placeholders
        );

        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for community in communities {
            query = query.bind(community);
        }

        Ok(query.fetch_all(&self.pool).await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn memory_store() -> CommunityStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        CommunityStore::from_pool(pool)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lg-communities-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_community_file() {
        let content = "# AS13335\n\n13335:10000   Learned in Europe\n13335:20000\tLearned from peer\nbroken\n";
        let records = parse_community_file(content);
        assert_eq!(
            records,
            vec![
                ("13335:10000".to_string(), "Learned in Europe".to_string()),
                ("13335:20000".to_string(), "Learned from peer".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rebuild_and_lookup_with_override() {
        let asns = scratch_dir("asns");
        let overrides = scratch_dir("override");
        std::fs::write(asns.join("13335.txt"), "13335:10000 Europe\n13335:10001 Asia\n").unwrap();
        std::fs::write(asns.join("README.md"), "65000:1 not a community file\n").unwrap();
        std::fs::write(overrides.join("local.txt"), "13335:10001 Asia Pacific\n").unwrap();

        let store = memory_store().await;
        let dirs = vec![
            asns.to_string_lossy().into_owned(),
            overrides.to_string_lossy().into_owned(),
            "/nonexistent/lg-communities".to_string(),
        ];
        let written = store.rebuild(&dirs).await.unwrap();
        assert_eq!(written, 3);

        let wanted: BTreeSet<String> = ["13335:10000", "13335:10001", "65000:1"]
            .into_iter()
            .map(String::from)
            .collect();
        let map = store.lookup_many(&wanted).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["13335:10000"], "Europe");
        assert_eq!(map["13335:10001"], "Asia Pacific");

        let _ = std::fs::remove_dir_all(asns);
        let _ = std::fs::remove_dir_all(overrides);
    }

    #[tokio::test]
    async fn test_rebuild_drops_previous_rows() {
        let dir = scratch_dir("rebuild");
        std::fs::write(dir.join("a.txt"), "65000:1 First\n").unwrap();

        let store = memory_store().await;
        let dirs = vec![dir.to_string_lossy().into_owned()];
        store.rebuild(&dirs).await.unwrap();

        std::fs::write(dir.join("a.txt"), "65000:2 Second\n").unwrap();
        store.rebuild(&dirs).await.unwrap();

        let wanted: BTreeSet<String> = ["65000:1", "65000:2"].into_iter().map(String::from).collect();
        let map = store.lookup_many(&wanted).await.unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["65000:2"]);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_empty_lookup_skips_query() {
        // no table exists; an empty set must not touch the database
        let store = memory_store().await;
        let map = store.lookup_many(&BTreeSet::new()).await.unwrap();
        assert!(map.is_empty());
    }
}
