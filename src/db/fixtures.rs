//! Sample store shared by the store tests.

use chrono::NaiveDate;

use super::{Database, FieldType, Item, MetaField, OptionValue, Picture, StarRating, Value};

fn date(y: i32, m: u32, d: u32) -> Value {
    Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

pub fn books_fields() -> Vec<MetaField> {
    vec![
        MetaField::new("Book Title", FieldType::Text).quick_searchable(true),
        MetaField::new("Author", FieldType::Text).quick_searchable(true),
        MetaField::new("Purchased", FieldType::Date),
        MetaField::new("Price", FieldType::Decimal),
        MetaField::new("Lent out", FieldType::Option),
        MetaField::new("Pages", FieldType::Integer),
    ]
}

pub fn dvds_fields() -> Vec<MetaField> {
    vec![
        MetaField::new("Title", FieldType::Text).quick_searchable(true),
        MetaField::new("Actors", FieldType::Text).quick_searchable(true),
        MetaField::new("Director", FieldType::Text).quick_searchable(true),
        MetaField::new("Release Year", FieldType::Integer),
        MetaField::new("Rating", FieldType::StarRating),
        MetaField::new("Seen", FieldType::Option),
    ]
}

pub fn music_fields() -> Vec<MetaField> {
    vec![
        MetaField::new("Artist", FieldType::Text).quick_searchable(true),
        MetaField::new("Album Title", FieldType::Text).quick_searchable(true),
        MetaField::new("Year", FieldType::Integer),
    ]
}

const BOOKS: &[(&str, &str, f64, OptionValue, i64)] = &[
    (
        "Design Patterns",
        "Erich Gamma, Richard Helm, Ralph Johnson, John Vlissides",
        45.5,
        OptionValue::Yes,
        395,
    ),
    ("Clean Code", "Robert C. Martin", 30.0, OptionValue::Yes, 464),
    ("97 Things Every Programmer Should Know", "Kevlin Henney", 25.0, OptionValue::No, 258),
    ("Peopleware", "Tom DeMarco, Timothy Lister", 30.0, OptionValue::No, 245),
    ("The Mythical Man-Month", "Frederick P. Brooks", 32.0, OptionValue::Unknown, 336),
    ("Refactoring", "Martin Fowler", 49.99, OptionValue::No, 448),
    (
        "Structure and Interpretation of Computer Programs",
        "Harold Abelson, Gerald Jay Sussman",
        55.0,
        OptionValue::No,
        657,
    ),
    ("Goedel, Escher, Bach", "Douglas Hofstadter", 20.0, OptionValue::Unknown, 777),
    ("The Art of Computer Programming", "Donald Knuth", 199.0, OptionValue::No, 3168),
];

const DVDS: &[(&str, &str, &str, i64, StarRating, OptionValue, usize)] = &[
    (
        "Short Circuit 2",
        "Cynthia Gibb, Fisher Stevens",
        "Kenneth Johnson",
        1988,
        StarRating::Three,
        OptionValue::Yes,
        1,
    ),
    (
        "One Flew Over the Cuckoo's Nest",
        "Jack Nicholson, Louise Fletcher",
        "Milos Forman",
        1975,
        StarRating::Five,
        OptionValue::Yes,
        2,
    ),
    ("RED", "Bruce Willis, Helen Mirren", "Robert Schwentke", 2010, StarRating::Four, OptionValue::No, 0),
    ("The Simpsons Movie", "The Simpsons", "David Silverman", 2007, StarRating::Four, OptionValue::Yes, 3),
    ("Inception", "Leonardo DiCaprio, Elliot Page", "Christopher Nolan", 2010, StarRating::Five, OptionValue::Unknown, 1),
];

/// A store with `Books` and `DVDs` filled and an empty `Music CDs`.
pub fn populated() -> Database {
    let mut db = Database::open_in_memory().unwrap();
    db.create_album("Books", books_fields(), true).unwrap();
    db.create_album("DVDs", dvds_fields(), true).unwrap();
    db.create_album("Music CDs", music_fields(), false).unwrap();

    for (i, (title, author, price, lent, pages)) in BOOKS.iter().enumerate() {
        let mut item = Item::new("Books")
            .with_value("Book Title", *title)
            .with_value("Author", *author)
            .with_value("Purchased", date(2010 + i as i32, 1 + i as u32, 10))
            .with_value("Price", *price)
            .with_value("Lent out", *lent)
            .with_value("Pages", *pages);
        if i % 3 == 0 {
            item = item.with_picture(Picture::new(
                format!("/covers/book{}.jpg", i),
                format!("/covers/book{}_thumb.jpg", i),
                "Books",
            ));
        }
        db.add_item(&item, false).unwrap();
    }

    for (title, actors, director, year, rating, seen, pictures) in DVDS {
        let mut item = Item::new("DVDs")
            .with_value("Title", *title)
            .with_value("Actors", *actors)
            .with_value("Director", *director)
            .with_value("Release Year", *year)
            .with_value("Rating", *rating)
            .with_value("Seen", *seen);
        for p in 0..*pictures {
            item = item.with_picture(Picture::new(
                format!("/dvd/{}_{}.jpg", year, p),
                format!("/dvd/{}_{}_thumb.jpg", year, p),
                "DVDs",
            ));
        }
        db.add_item(&item, false).unwrap();
    }

    db
}
