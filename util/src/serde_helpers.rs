use std::path::Path;

use anyhow::Result;
use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn load_json_from_file<T, P>(path: P) -> Result<T>
where
    for<'de> T: Deserialize<'de>,
    P: AsRef<Path>,
{
    let data = std::fs::read_to_string(path)?;
    let de = &mut serde_json::Deserializer::from_str(&data);
    serde_path_to_error::deserialize(de).map_err(Into::into)
}

pub mod humantime {
    use std::time::Duration;

    use super::*;

    pub fn serialize<T, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        for<'a> Serde<&'a T>: Serialize,
    {
        Serde::from(value).serialize(serializer)
    }

    pub fn deserialize<'a, T, D: Deserializer<'a>>(deserializer: D) -> Result<T, D::Error>
    where
        Serde<T>: Deserialize<'a>,
    {
        Serde::deserialize(deserializer).map(Serde::into_inner)
    }

    pub struct Serde<T>(T);

    impl<T> Serde<T> {
        #[inline]
        pub fn into_inner(self) -> T {
            self.0
        }
    }

    impl<T> From<T> for Serde<T> {
        fn from(value: T) -> Serde<T> {
            Serde(value)
        }
    }

    impl<'de> Deserialize<'de> for Serde<Duration> {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Serde<Duration>, D::Error> {
            struct V;

            impl Visitor<'_> for V {
                type Value = Duration;

                fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str("a duration")
                }

                fn visit_str<E: Error>(self, v: &str) -> Result<Duration, E> {
                    ::humantime::parse_duration(v)
                        .map_err(|_e| E::invalid_value(serde::de::Unexpected::Str(v), &self))
                }
            }

            d.deserialize_str(V).map(Serde)
        }
    }

    impl<'de> Deserialize<'de> for Serde<Option<Duration>> {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Serde<Option<Duration>>, D::Error> {
            match Option::<Serde<Duration>>::deserialize(d)? {
                Some(Serde(v)) => Ok(Serde(Some(v))),
                None => Ok(Serde(None)),
            }
        }
    }

    impl Serialize for Serde<&Duration> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(&::humantime::format_duration(*self.0))
        }
    }

    impl Serialize for Serde<Duration> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(&::humantime::format_duration(self.0))
        }
    }

    impl Serialize for Serde<&Option<Duration>> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match *self.0 {
                Some(v) => serializer.serialize_some(&Serde(v)),
                None => serializer.serialize_none(),
            }
        }
    }

    impl Serialize for Serde<Option<Duration>> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            Serde(&self.0).serialize(serializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Intervals {
        #[serde(with = "humantime")]
        tick: Duration,
        #[serde(with = "humantime", default)]
        retry: Option<Duration>,
    }

    #[test]
    fn humantime_durations() {
        let parsed: Intervals =
            serde_json::from_str(r#"{ "tick": "500ms", "retry": "5m" }"#).unwrap();
        assert_eq!(parsed, Intervals {
            tick: Duration::from_millis(500),
            retry: Some(Duration::from_secs(300)),
        });

        let parsed: Intervals = serde_json::from_str(r#"{ "tick": "1h" }"#).unwrap();
        assert_eq!(parsed.retry, None);
        assert_eq!(parsed.tick, Duration::from_secs(3600));
    }

    #[test]
    fn load_reports_field_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "tick": 123 }"#).unwrap();

        let err = load_json_from_file::<Intervals, _>(&path).unwrap_err();
        assert!(err.to_string().contains("tick"), "{err}");
    }
}
