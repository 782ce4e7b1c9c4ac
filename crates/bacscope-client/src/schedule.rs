//! Typed views of Schedule, Calendar and EventEnrollment property values.
//!
//! Reads hand back a [`ClientDataValue`] shaped by the value codec: a weekly
//! schedule is a list of seven `[0]`-constructed day schedules, a calendar
//! date list is a list of `[0]` dates, `[1]` date ranges and `[2]` week-n-day
//! octets. The helpers here convert between those shapes and plain structs.

use crate::ClientDataValue;
use bacscope_core::types::{Date, ObjectId, PropertyId, Time};

const DAYS_PER_WEEK: usize = 7;

/// A single time-value pair in a daily schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeValue {
    pub time: Time,
    pub value: ClientDataValue,
}

impl TimeValue {
    pub fn new(hour: u8, minute: u8, value: ClientDataValue) -> Self {
        Self {
            time: Time {
                hour,
                minute,
                second: 0,
                hundredths: 0,
            },
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

/// An entry of a Calendar's dateList.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarEntry {
    Date(Date),
    Range(DateRange),
    WeekNDay {
        month: u8,
        week_of_month: u8,
        day_of_week: u8,
    },
}

/// Seven day schedules, Monday first.
pub fn decode_weekly_schedule(value: &ClientDataValue) -> Option<Vec<Vec<TimeValue>>> {
    let days = value.elements();
    if days.len() != DAYS_PER_WEEK {
        return None;
    }

    let mut week = Vec::with_capacity(DAYS_PER_WEEK);
    for day in days {
        let ClientDataValue::Constructed { values, .. } = day else {
            return None;
        };
        let mut entries = Vec::with_capacity(values.len() / 2);
        for pair in values.chunks(2) {
            match pair {
                [ClientDataValue::Time(time), value] => entries.push(TimeValue {
                    time: *time,
                    value: value.clone(),
                }),
                _ => return None,
            }
        }
        week.push(entries);
    }
    Some(week)
}

/// Builds a weeklySchedule value; missing days are empty.
pub fn encode_weekly_schedule(week: &[Vec<TimeValue>]) -> ClientDataValue {
    let days = (0..DAYS_PER_WEEK)
        .map(|i| {
            let values = week
                .get(i)
                .into_iter()
                .flatten()
                .flat_map(|entry| [ClientDataValue::Time(entry.time), entry.value.clone()])
                .collect();
            ClientDataValue::Constructed { tag_num: 0, values }
        })
        .collect();
    ClientDataValue::List(days)
}

fn date_from_octets(data: &[u8]) -> Option<Date> {
    match *data {
        [year_since_1900, month, day, weekday] => Some(Date {
            year_since_1900,
            month,
            day,
            weekday,
        }),
        _ => None,
    }
}

fn date_octets(date: Date) -> Vec<u8> {
    vec![date.year_since_1900, date.month, date.day, date.weekday]
}

pub fn decode_date_list(value: &ClientDataValue) -> Option<Vec<CalendarEntry>> {
    if value.is_null() {
        return Some(Vec::new());
    }
    value
        .elements()
        .iter()
        .map(|item| match item {
            ClientDataValue::Date(date) => Some(CalendarEntry::Date(*date)),
            ClientDataValue::Context { tag_num: 0, data } => date_from_octets(data).map(CalendarEntry::Date),
            ClientDataValue::Constructed { tag_num: 1, values } => match values.as_slice() {
                [ClientDataValue::Date(start), ClientDataValue::Date(end)] => {
                    Some(CalendarEntry::Range(DateRange {
                        start: *start,
                        end: *end,
                    }))
                }
                _ => None,
            },
            ClientDataValue::Context { tag_num: 2, data } => match data.as_slice() {
                [month, week_of_month, day_of_week] => Some(CalendarEntry::WeekNDay {
                    month: *month,
                    week_of_month: *week_of_month,
                    day_of_week: *day_of_week,
                }),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

pub fn encode_date_list(entries: &[CalendarEntry]) -> ClientDataValue {
    ClientDataValue::List(
        entries
            .iter()
            .map(|entry| match entry {
                CalendarEntry::Date(date) => ClientDataValue::Context {
                    tag_num: 0,
                    data: date_octets(*date),
                },
                CalendarEntry::Range(range) => ClientDataValue::Constructed {
                    tag_num: 1,
                    values: vec![ClientDataValue::Date(range.start), ClientDataValue::Date(range.end)],
                },
                CalendarEntry::WeekNDay {
                    month,
                    week_of_month,
                    day_of_week,
                } => ClientDataValue::Context {
                    tag_num: 2,
                    data: vec![*month, *week_of_month, *day_of_week],
                },
            })
            .collect(),
    )
}

fn unsigned_octets(value: u32) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take(3).take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

fn context_unsigned(tag_num: u8, value: u32) -> ClientDataValue {
    ClientDataValue::Context {
        tag_num,
        data: unsigned_octets(value),
    }
}

fn context_real(tag_num: u8, value: f32) -> ClientDataValue {
    ClientDataValue::Context {
        tag_num,
        data: value.to_be_bytes().to_vec(),
    }
}

/// BACnetDeviceObjectPropertyReference, as written to an event enrollment's
/// objectPropertyReference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectPropertyReference {
    pub object_id: ObjectId,
    pub property: PropertyId,
    pub array_index: Option<u32>,
    pub device_id: Option<ObjectId>,
}

impl ObjectPropertyReference {
    pub fn to_value(&self) -> ClientDataValue {
        let mut values = vec![
            ClientDataValue::Context {
                tag_num: 0,
                data: self.object_id.raw().to_be_bytes().to_vec(),
            },
            context_unsigned(1, self.property.to_u32()),
        ];
        if let Some(index) = self.array_index {
            values.push(context_unsigned(2, index));
        }
        if let Some(device) = self.device_id {
            values.push(ClientDataValue::Context {
                tag_num: 3,
                data: device.raw().to_be_bytes().to_vec(),
            });
        }
        ClientDataValue::List(values)
    }
}

/// The eventParameters choices the client knows how to build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventParameters {
    ChangeOfValue {
        time_delay: u32,
        increment: f32,
    },
    OutOfRange {
        time_delay: u32,
        low_limit: f32,
        high_limit: f32,
        deadband: f32,
    },
}

impl EventParameters {
    pub fn to_value(&self) -> ClientDataValue {
        match *self {
            Self::ChangeOfValue {
                time_delay,
                increment,
            } => ClientDataValue::Constructed {
                tag_num: 2,
                values: vec![
                    context_unsigned(0, time_delay),
                    ClientDataValue::Constructed {
                        tag_num: 1,
                        values: vec![context_real(1, increment)],
                    },
                ],
            },
            Self::OutOfRange {
                time_delay,
                low_limit,
                high_limit,
                deadband,
            } => ClientDataValue::Constructed {
                tag_num: 5,
                values: vec![
                    context_unsigned(0, time_delay),
                    context_real(1, low_limit),
                    context_real(2, high_limit),
                    context_real(3, deadband),
                ],
            },
        }
    }
}
