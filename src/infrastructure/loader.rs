//! Validation and deduplication of scraped records
//!
//! The strict counterpart to the log's tolerant readers: this is the trust
//! boundary before the primary datastore, so an unparsable line or a record
//! without an identifier aborts the whole load instead of being skipped.
//! Duplicate identifiers keep the later occurrence, which reflects a
//! corrected re-fetch appended after the original.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::domain::course::{Course, RawCourse, raw_id};
use crate::domain::errors::HarvestError;

/// Read, validate, and deduplicate every record in the scraped log.
pub fn load_scraped_courses(path: impl AsRef<Path>) -> Result<Vec<Course>, HarvestError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    // Dedup by id, later line wins; first-seen order is kept so reruns
    // produce identical batches.
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, (usize, RawCourse)> = HashMap::new();

    let mut lines = 0usize;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let number = number + 1;
        lines += 1;

        let record: RawCourse = match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(serde_json::Value::Object(record)) => record,
            Ok(_) => {
                return Err(HarvestError::validation(number, "not a JSON object"));
            }
            Err(e) => {
                return Err(HarvestError::validation(number, format!("unparsable line: {e}")));
            }
        };

        let id = raw_id(&record)
            .ok_or_else(|| HarvestError::validation(number, "missing required field 'id'"))?;

        if latest.insert(id.clone(), (number, record)).is_none() {
            order.push(id);
        } else {
            debug!(%id, line = number, "replacing earlier record for id");
        }
    }

    let mut courses = Vec::with_capacity(order.len());
    for id in &order {
        let (number, record) = &latest[id];
        courses.push(Course::from_raw(record, *number)?);
    }

    info!(
        path = %path.display(),
        lines,
        unique = courses.len(),
        "loaded scraped course records"
    );
    Ok(courses)
}
