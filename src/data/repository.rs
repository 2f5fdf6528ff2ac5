use rusqlite::{params, params_from_iter, Connection, Row};

use crate::error::AppError;
use crate::models::folder::{IndexStats, WatchedFolder};
use crate::models::image::IndexedImage;

const IMAGE_COLUMNS: &str =
    "file_path, file_name, folder_path, extracted_text, last_modified, file_size, indexed_at";
const FOLDER_COLUMNS: &str = "folder_path, display_name, last_scan_at, image_count, is_active";

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<IndexedImage> {
    Ok(IndexedImage {
        file_path: row.get(0)?,
        file_name: row.get(1)?,
        folder_path: row.get(2)?,
        extracted_text: row.get(3)?,
        last_modified: row.get(4)?,
        file_size: row.get(5)?,
        indexed_at: row.get(6)?,
    })
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<WatchedFolder> {
    Ok(WatchedFolder {
        folder_path: row.get(0)?,
        display_name: row.get(1)?,
        last_scan_at: row.get(2)?,
        image_count: row.get(3)?,
        is_active: row.get(4)?,
    })
}

// ---- images ----

pub fn upsert_image(conn: &Connection, image: &IndexedImage) -> Result<(), AppError> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO images ({IMAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            image.file_path,
            image.file_name,
            image.folder_path,
            image.extracted_text,
            image.last_modified,
            image.file_size,
            image.indexed_at,
        ],
    )?;
    Ok(())
}

pub fn get_image(conn: &Connection, file_path: &str) -> Result<Option<IndexedImage>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE file_path = ?1"
    ))?;
    let image = stmt.query_row(params![file_path], image_from_row).optional()?;
    Ok(image)
}

pub fn images_in_folder(conn: &Connection, folder_path: &str) -> Result<Vec<IndexedImage>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE folder_path = ?1"
    ))?;
    let images = stmt
        .query_map(params![folder_path], image_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

pub fn count_images_in_folder(conn: &Connection, folder_path: &str) -> Result<i64, AppError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM images WHERE folder_path = ?1",
        params![folder_path],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn delete_image(conn: &Connection, file_path: &str) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM images WHERE file_path = ?1", params![file_path])?;
    Ok(count)
}

pub fn delete_images(conn: &Connection, file_paths: &[String]) -> Result<usize, AppError> {
    if file_paths.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut removed = 0;
    for path in file_paths {
        removed += delete_image(&tx, path)?;
    }
    tx.commit()?;
    Ok(removed)
}

pub fn delete_images_in_folder(conn: &Connection, folder_path: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM images WHERE folder_path = ?1",
        params![folder_path],
    )?;
    Ok(count)
}

pub fn delete_all_images(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM images", [])?;
    Ok(count)
}

/// Removes images whose owning folder is missing or inactive.
pub fn delete_orphan_images(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM images WHERE folder_path NOT IN
            (SELECT folder_path FROM folders WHERE is_active = 1)",
        [],
    )?;
    Ok(count)
}

fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

/// Conjunctive substring match: every keyword must occur in the text, the file
/// name or the folder path of a row. Matching follows SQLite `LIKE`, so it is
/// case-insensitive for ASCII.
pub fn search_images(
    conn: &Connection,
    keywords: &[String],
    limit: Option<usize>,
) -> Result<Vec<IndexedImage>, AppError> {
    if keywords.is_empty() {
        return Ok(Vec::new());
    }

    let clause = "(extracted_text LIKE ? ESCAPE '\\' OR file_name LIKE ? ESCAPE '\\' OR folder_path LIKE ? ESCAPE '\\')";
    let mut sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE ");
    sql.push_str(&vec![clause; keywords.len()].join(" AND "));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let args: Vec<String> = keywords
        .iter()
        .flat_map(|keyword| {
            let pattern = escape_like(keyword);
            [pattern.clone(), pattern.clone(), pattern]
        })
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let images = stmt
        .query_map(params_from_iter(args.iter()), image_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

pub fn index_stats(conn: &Connection) -> Result<IndexStats, AppError> {
    let stats = conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM images),
            (SELECT COUNT(*) FROM images WHERE extracted_text != ''),
            (SELECT COUNT(*) FROM folders WHERE is_active = 1)",
        [],
        |row| {
            Ok(IndexStats {
                total_images: row.get(0)?,
                images_with_text: row.get(1)?,
                active_folders: row.get(2)?,
            })
        },
    )?;
    Ok(stats)
}

// ---- folders ----

pub fn insert_folder(conn: &Connection, folder: &WatchedFolder) -> Result<(), AppError> {
    conn.execute(
        &format!("INSERT OR REPLACE INTO folders ({FOLDER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            folder.folder_path,
            folder.display_name,
            folder.last_scan_at,
            folder.image_count,
            folder.is_active,
        ],
    )?;
    Ok(())
}

pub fn get_folder(conn: &Connection, folder_path: &str) -> Result<Option<WatchedFolder>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders WHERE folder_path = ?1"
    ))?;
    let folder = stmt.query_row(params![folder_path], folder_from_row).optional()?;
    Ok(folder)
}

pub fn list_folders(conn: &Connection) -> Result<Vec<WatchedFolder>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders ORDER BY display_name ASC"
    ))?;
    let folders = stmt
        .query_map([], folder_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(folders)
}

pub fn list_active_folders(conn: &Connection) -> Result<Vec<WatchedFolder>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders WHERE is_active = 1 ORDER BY display_name ASC"
    ))?;
    let folders = stmt
        .query_map([], folder_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(folders)
}

pub fn delete_folder(conn: &Connection, folder_path: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "DELETE FROM folders WHERE folder_path = ?1",
        params![folder_path],
    )?;
    Ok(count)
}

pub fn deactivate_folder(conn: &Connection, folder_path: &str) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE folders SET is_active = 0 WHERE folder_path = ?1",
        params![folder_path],
    )?;
    Ok(count)
}

pub fn purge_inactive_folders(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute("DELETE FROM folders WHERE is_active = 0", [])?;
    Ok(count)
}

pub fn update_folder_scan_info(
    conn: &Connection,
    folder_path: &str,
    last_scan_at: i64,
    image_count: i64,
) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE folders SET last_scan_at = ?2, image_count = ?3 WHERE folder_path = ?1",
        params![folder_path, last_scan_at, image_count],
    )?;
    Ok(count)
}

pub fn reset_active_folder_scan_info(conn: &Connection) -> Result<usize, AppError> {
    let count = conn.execute(
        "UPDATE folders SET last_scan_at = 0, image_count = 0 WHERE is_active = 1",
        [],
    )?;
    Ok(count)
}

// ---- settings ----

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

// Needed for rusqlite optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::migrations::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn sample_image(path: &str, folder: &str, text: &str) -> IndexedImage {
        IndexedImage {
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap().to_string(),
            folder_path: folder.to_string(),
            extracted_text: text.to_string(),
            last_modified: 1_000,
            file_size: 2_048,
            indexed_at: 5_000,
        }
    }

    fn keywords(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_image_crud() {
        let conn = setup_db();
        let image = sample_image("/pics/receipt.png", "/pics", "total 12.50");

        upsert_image(&conn, &image).unwrap();
        let fetched = get_image(&conn, &image.file_path).unwrap().unwrap();
        assert_eq!(fetched, image);

        assert_eq!(images_in_folder(&conn, "/pics").unwrap().len(), 1);
        assert_eq!(count_images_in_folder(&conn, "/pics").unwrap(), 1);

        assert_eq!(delete_image(&conn, &image.file_path).unwrap(), 1);
        assert!(get_image(&conn, &image.file_path).unwrap().is_none());
    }

    #[test]
    fn test_upsert_overwrites() {
        let conn = setup_db();
        let mut image = sample_image("/pics/a.png", "/pics", "old");
        upsert_image(&conn, &image).unwrap();

        image.extracted_text = "new".to_string();
        image.last_modified = 2_000;
        upsert_image(&conn, &image).unwrap();

        let fetched = get_image(&conn, "/pics/a.png").unwrap().unwrap();
        assert_eq!(fetched.extracted_text, "new");
        assert_eq!(fetched.last_modified, 2_000);
        assert_eq!(count_images_in_folder(&conn, "/pics").unwrap(), 1);
    }

    #[test]
    fn test_bulk_delete() {
        let conn = setup_db();
        for path in ["/pics/a.png", "/pics/b.png", "/pics/c.png"] {
            upsert_image(&conn, &sample_image(path, "/pics", "")).unwrap();
        }

        let removed = delete_images(
            &conn,
            &["/pics/a.png".to_string(), "/pics/missing.png".to_string()],
        )
        .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(count_images_in_folder(&conn, "/pics").unwrap(), 2);
        assert_eq!(delete_images(&conn, &[]).unwrap(), 0);
    }

    #[test]
    fn test_search_is_conjunctive_over_fields() {
        let conn = setup_db();
        upsert_image(&conn, &sample_image("/pics/one.png", "/pics", "cat on mat")).unwrap();
        upsert_image(&conn, &sample_image("/pics/two.png", "/pics", "dog in fog")).unwrap();

        let hits = search_images(&conn, &keywords(&["cat", "mat"]), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "/pics/one.png");

        assert!(search_images(&conn, &keywords(&["cat", "fog"]), None)
            .unwrap()
            .is_empty());

        // one keyword in the text, the other in the file name
        let hits = search_images(&conn, &keywords(&["dog", "two"]), None).unwrap();
        assert_eq!(hits.len(), 1);

        // folder path matches every row
        assert_eq!(search_images(&conn, &keywords(&["pics"]), None).unwrap().len(), 2);
    }

    #[test]
    fn test_search_is_case_insensitive_and_escapes_wildcards() {
        let conn = setup_db();
        upsert_image(&conn, &sample_image("/pics/a.png", "/pics", "Invoice 100%")).unwrap();
        upsert_image(&conn, &sample_image("/pics/b.png", "/pics", "Invoice 1000")).unwrap();

        assert_eq!(search_images(&conn, &keywords(&["INVOICE"]), None).unwrap().len(), 2);
        let hits = search_images(&conn, &keywords(&["100%"]), None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_path, "/pics/a.png");
        assert!(search_images(&conn, &keywords(&["o_c"]), None).unwrap().is_empty());
    }

    #[test]
    fn test_search_limit() {
        let conn = setup_db();
        for i in 0..10 {
            let path = format!("/pics/shot_{i}.png");
            upsert_image(&conn, &sample_image(&path, "/pics", "common")).unwrap();
        }
        assert_eq!(search_images(&conn, &keywords(&["common"]), Some(3)).unwrap().len(), 3);
        assert!(search_images(&conn, &[], None).unwrap().is_empty());
    }

    #[test]
    fn test_folder_lifecycle() {
        let conn = setup_db();
        let folder = WatchedFolder::new("/pics", "pics");
        insert_folder(&conn, &folder).unwrap();

        assert_eq!(list_active_folders(&conn).unwrap().len(), 1);
        update_folder_scan_info(&conn, "/pics", 42, 7).unwrap();
        let fetched = get_folder(&conn, "/pics").unwrap().unwrap();
        assert_eq!(fetched.last_scan_at, 42);
        assert_eq!(fetched.image_count, 7);

        deactivate_folder(&conn, "/pics").unwrap();
        assert!(list_active_folders(&conn).unwrap().is_empty());
        assert_eq!(list_folders(&conn).unwrap().len(), 1);

        assert_eq!(purge_inactive_folders(&conn).unwrap(), 1);
        assert!(get_folder(&conn, "/pics").unwrap().is_none());
    }

    #[test]
    fn test_orphans_and_stats() {
        let conn = setup_db();
        insert_folder(&conn, &WatchedFolder::new("/pics", "pics")).unwrap();
        upsert_image(&conn, &sample_image("/pics/a.png", "/pics", "text")).unwrap();
        upsert_image(&conn, &sample_image("/pics/b.png", "/pics", "")).unwrap();
        upsert_image(&conn, &sample_image("/gone/c.png", "/gone", "text")).unwrap();

        let stats = index_stats(&conn).unwrap();
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.images_with_text, 2);
        assert_eq!(stats.active_folders, 1);

        assert_eq!(delete_orphan_images(&conn).unwrap(), 1);
        assert!(get_image(&conn, "/gone/c.png").unwrap().is_none());
    }

    #[test]
    fn test_reset_and_clear() {
        let conn = setup_db();
        insert_folder(&conn, &WatchedFolder::new("/pics", "pics")).unwrap();
        update_folder_scan_info(&conn, "/pics", 42, 1).unwrap();
        upsert_image(&conn, &sample_image("/pics/a.png", "/pics", "text")).unwrap();

        assert_eq!(delete_all_images(&conn).unwrap(), 1);
        reset_active_folder_scan_info(&conn).unwrap();
        let folder = get_folder(&conn, "/pics").unwrap().unwrap();
        assert_eq!(folder.last_scan_at, 0);
        assert_eq!(folder.image_count, 0);
        assert!(folder.is_active);
    }

    #[test]
    fn test_settings_upsert() {
        let conn = setup_db();
        assert!(get_setting(&conn, "scan_frequency").unwrap().is_none());
        set_setting(&conn, "scan_frequency", "daily").unwrap();
        set_setting(&conn, "scan_frequency", "weekly").unwrap();
        assert_eq!(
            get_setting(&conn, "scan_frequency").unwrap().as_deref(),
            Some("weekly")
        );
    }
}
