use serde::{Deserialize, Serialize};
use tracing::error;

/// S3 "object created" notification, as delivered by the bucket's event configuration.
/// Only the fields the pipeline looks at are modelled.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct ObjectCreatedEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<EventRecord>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub s3: S3Entity,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ObjectEntity {
    pub key: String,
}

impl EventRecord {
    pub fn new(bucket: &str, key: &str) -> Self {
        Self {
            s3: S3Entity {
                bucket: BucketEntity {
                    name: bucket.to_owned(),
                },
                object: ObjectEntity {
                    key: key.to_owned(),
                },
            },
        }
    }

    pub fn bucket(&self) -> &str {
        &self.s3.bucket.name
    }

    /// Keys arrive form-encoded: spaces as `+`, everything else percent-escaped.
    pub fn decoded_key(&self) -> String {
        let key = self.s3.object.key.replace('+', " ");
        match urlencoding::decode(&key) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => key,
        }
    }
}

/// Checks that an event points at an encrypted file in the staging area.
pub struct FileValidation<'a> {
    bucket: &'a str,
    input_path: &'a str,
    extension: &'a str,
}

impl<'a> FileValidation<'a> {
    pub fn new(bucket: &'a str, input_path: &'a str, extension: &'a str) -> Self {
        Self {
            bucket,
            input_path,
            extension,
        }
    }

    pub fn is_valid(&self, record: &EventRecord) -> bool {
        let key = record.decoded_key();
        record.bucket() == self.bucket
            && key.starts_with(self.input_path)
            && key.ends_with(self.extension)
    }

    /// Report every record that fails validation and return how many did. Invalid records
    /// do not stop the run: the staging area listing decides what gets processed.
    pub fn report_invalid(&self, event: &ObjectCreatedEvent) -> usize {
        let mut invalid = 0;
        for record in event.records.iter().filter(|r| !self.is_valid(r)) {
            error!(
                bucket = record.bucket(),
                key = %record.decoded_key(),
                "file is not valid for processing"
            );
            metrics::counter!("invalid_event_records_total").increment(1);
            invalid += 1;
        }
        invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validation() -> FileValidation<'static> {
        FileValidation::new("incoming", "carpeta_entrada/", ".pgp")
    }

    #[test]
    fn test_parses_notification_document() {
        let body = r#"{
            "Records": [
                {
                    "eventName": "ObjectCreated:Put",
                    "s3": {
                        "bucket": { "name": "incoming", "arn": "arn:aws:s3:::incoming" },
                        "object": { "key": "carpeta_entrada/5402ORDINARIO.dat.pgp", "size": 1024 }
                    }
                }
            ]
        }"#;

        let event: ObjectCreatedEvent = serde_json::from_str(body).unwrap();
        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].bucket(), "incoming");
        assert!(validation().is_valid(&event.records[0]));
    }

    #[test]
    fn test_missing_records_is_empty_event() {
        let event: ObjectCreatedEvent = serde_json::from_str("{}").unwrap();
        assert!(event.records.is_empty());
    }

    #[test]
    fn test_decodes_form_encoded_keys() {
        let record = EventRecord::new("incoming", "carpeta_entrada/my+file%281%29.pgp");
        assert_eq!(record.decoded_key(), "carpeta_entrada/my file(1).pgp");
    }

    #[test]
    fn test_rejects_wrong_bucket_path_or_extension() {
        let v = validation();
        assert!(!v.is_valid(&EventRecord::new("other", "carpeta_entrada/a.pgp")));
        assert!(!v.is_valid(&EventRecord::new("incoming", "carpeta_salida/a.pgp")));
        assert!(!v.is_valid(&EventRecord::new("incoming", "carpeta_entrada/a.txt")));
    }

    #[test]
    fn test_report_invalid_counts_without_failing() {
        let event = ObjectCreatedEvent {
            records: vec![
                EventRecord::new("incoming", "carpeta_entrada/a.pgp"),
                EventRecord::new("incoming", "carpeta_entrada/b.txt"),
                EventRecord::new("other", "carpeta_entrada/c.pgp"),
            ],
        };

        assert_eq!(validation().report_invalid(&event), 2);
    }
}
