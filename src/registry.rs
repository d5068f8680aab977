use crate::{
    config::RegistryConfig,
    data::{Book, Error, BOOK_ID_PREFIX},
};
use rand::Rng;
use rust_decimal::Decimal;

pub(crate) fn book_id(index: u32) -> String {
    format!("{BOOK_ID_PREFIX}{index:04}")
}

/// Creates `config.books` books with sequential ids starting at `SAPB0001`.
/// System entity and system tag are drawn independently for every book.
pub(crate) fn generate_books<R: Rng>(
    config: &RegistryConfig,
    rng: &mut R,
) -> Result<Vec<Book>, Error> {
    config.validate()?;
    let books = (1..=config.books)
        .map(|i| Book {
            book_id: book_id(i),
            book_name: format!("Book_{i}"),
            cost_center: format!("CC{}", rng.gen_range(100..=999)),
            system_entity: config.system_entities[rng.gen_range(0..config.system_entities.len())]
                .clone(),
            system: config.systems[rng.gen_range(0..config.systems.len())].clone(),
            opening_balance: Decimal::from(
                rng.gen_range(config.opening_balance_min..config.opening_balance_max),
            ),
        })
        .collect();
    Ok(books)
}

#[cfg(test)]
mod tests {
    use super::generate_books;
    use crate::{config::RegistryConfig, data::Error};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rust_decimal::Decimal;
    use std::collections::HashSet;

    #[test]
    fn sequential_ids() {
        let config = RegistryConfig {
            books: 12,
            ..RegistryConfig::default()
        };
        let books = generate_books(&config, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert_eq!(books.len(), 12);
        assert_eq!(books[0].book_id, "SAPB0001");
        assert_eq!(books[0].book_name, "Book_1");
        assert_eq!(books[11].book_id, "SAPB0012");
        let ids: HashSet<_> = books.iter().map(|b| &b.book_id).collect();
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn attributes_within_configuration() {
        let config = RegistryConfig {
            books: 50,
            opening_balance_min: 10,
            opening_balance_max: 20,
            ..RegistryConfig::default()
        };
        let books = generate_books(&config, &mut ChaCha8Rng::seed_from_u64(2)).unwrap();
        for book in &books {
            assert!(book.opening_balance >= Decimal::from(10));
            assert!(book.opening_balance < Decimal::from(20));
            let cc: u32 = book.cost_center.strip_prefix("CC").unwrap().parse().unwrap();
            assert!((100..=999).contains(&cc));
            assert!(config.system_entities.contains(&book.system_entity));
            assert!(config.systems.contains(&book.system));
        }
    }

    #[test]
    fn tags_are_drawn_per_book() {
        let config = RegistryConfig {
            books: 200,
            ..RegistryConfig::default()
        };
        let books = generate_books(&config, &mut ChaCha8Rng::seed_from_u64(3)).unwrap();
        let entities: HashSet<_> = books.iter().map(|b| &b.system_entity).collect();
        let systems: HashSet<_> = books.iter().map(|b| &b.system).collect();
        assert!(entities.len() > 1);
        assert!(systems.len() > 1);
    }

    #[test]
    fn seeded_registry_is_reproducible() {
        let config = RegistryConfig::default();
        assert_eq!(
            generate_books(&config, &mut ChaCha8Rng::seed_from_u64(4)).unwrap(),
            generate_books(&config, &mut ChaCha8Rng::seed_from_u64(4)).unwrap(),
        );
    }

    #[test]
    fn zero_books_is_a_configuration_error() {
        let config = RegistryConfig {
            books: 0,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            generate_books(&config, &mut ChaCha8Rng::seed_from_u64(5)),
            Err(Error::Config { param: "registry.books", .. })
        ));
    }
}
